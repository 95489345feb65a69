use std::sync::Arc;

use anyhow::Context;

use stockledger_infra::LedgerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = LedgerConfig::load().context("failed to load configuration")?;
    stockledger_observability::init(&config.log_level);

    let (services, worker) = stockledger_api::app::services::build_services(&config).await?;
    let notifier = worker.spawn();
    let app = stockledger_api::app::build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    notifier.shutdown().await;
    tracing::info!("shut down");
    Ok(())
}
