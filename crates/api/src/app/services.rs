//! Infrastructure wiring: store, locks, notifier, engine and catalog.

use std::sync::Arc;

use stockledger_infra::{
    CatalogService, ChangeNotifier, InMemoryLedgerStore, LedgerConfig, LedgerEngine, LedgerStore, NotifierWorker,
    WarehouseLocks,
};

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppServices {
    pub engine: LedgerEngine,
    pub catalog: CatalogService,
    pub notifier: Arc<ChangeNotifier>,
}

impl AppServices {
    /// Wire engine, catalog and notifier over `store`.
    ///
    /// The returned worker must be spawned for watchers to receive notifications.
    pub fn over(store: Arc<dyn LedgerStore>, config: &LedgerConfig) -> (Self, NotifierWorker) {
        let locks = Arc::new(WarehouseLocks::new());
        let (notifier, worker) = ChangeNotifier::new(store.clone(), config);
        let services = Self {
            engine: LedgerEngine::new(store.clone(), notifier.clone(), locks.clone(), config),
            catalog: CatalogService::new(store, notifier.clone(), locks, config),
            notifier,
        };
        (services, worker)
    }

    /// In-memory wiring (dev/test).
    pub fn in_memory(config: &LedgerConfig) -> (Self, NotifierWorker) {
        Self::over(Arc::new(InMemoryLedgerStore::new()), config)
    }
}

/// Pick the store from configuration: Postgres when `database_url` is set and
/// the `postgres` feature is compiled in, in-memory otherwise.
pub async fn build_services(config: &LedgerConfig) -> anyhow::Result<(AppServices, NotifierWorker)> {
    match postgres_store(config).await? {
        Some(store) => {
            tracing::info!("using postgres ledger store");
            Ok(AppServices::over(store, config))
        }
        None => {
            tracing::info!("using in-memory ledger store");
            Ok(AppServices::in_memory(config))
        }
    }
}

#[cfg(feature = "postgres")]
async fn postgres_store(config: &LedgerConfig) -> anyhow::Result<Option<Arc<dyn LedgerStore>>> {
    let Some(url) = &config.database_url else {
        return Ok(None);
    };
    let store = stockledger_infra::store::PostgresLedgerStore::connect(url)
        .await
        .map_err(|e| anyhow::anyhow!("postgres connection failed: {e}"))?;
    Ok(Some(Arc::new(store)))
}

#[cfg(not(feature = "postgres"))]
async fn postgres_store(config: &LedgerConfig) -> anyhow::Result<Option<Arc<dyn LedgerStore>>> {
    if config.database_url.is_some() {
        tracing::warn!("database_url is set but the postgres feature is not compiled in");
    }
    Ok(None)
}
