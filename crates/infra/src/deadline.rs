//! Per-operation deadlines.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::LedgerError;

/// Run `fut` to completion or fail with `LedgerError::Timeout` after `after`.
///
/// On timeout the future is dropped at its current await point. Store commits
/// are atomic, so a timed-out operation either committed fully or not at all;
/// callers that must know which should retry with a de-duplication key.
pub async fn within<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T, LedgerError>
where
    F: Future<Output = Result<T, LedgerError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = after.as_millis() as u64, "operation timed out");
            Err(LedgerError::Timeout { operation, after })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_operation_passes_through() {
        let out = within("op", Duration::from_secs(1), async { Ok::<_, LedgerError>(7) }).await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out() {
        let out = within("op", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, LedgerError>(())
        })
        .await;
        assert!(matches!(out, Err(LedgerError::Timeout { operation: "op", .. })));
    }
}
