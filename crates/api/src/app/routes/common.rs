use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use stockledger_infra::LedgerError;

use crate::app::errors;

/// Serialize `result` with `status`, or map the error to its JSON response.
pub fn respond<T: Serialize>(status: StatusCode, result: Result<T, LedgerError>) -> axum::response::Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
