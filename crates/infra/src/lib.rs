//! Infrastructure layer: stores, the ledger engine, catalog, change notifier, config.

pub mod capacity;
pub mod catalog;
pub mod config;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod locks;
pub mod notifier;
pub mod store;


pub use capacity::CapacityGuard;
pub use catalog::{
    AlertType, CatalogService, NewProduct, NewWarehouse, ProductUpdate, ReconciliationLine, StockAlert, TopBy,
    WarehouseUpdate,
};
pub use config::LedgerConfig;
pub use engine::{AdjustRequest, LedgerEngine, OperationOutcome, StockRequest, TransferRequest};
pub use error::{ErrorKind, LedgerError};
pub use locks::WarehouseLocks;
pub use notifier::{
    ChangeNotification, ChangeNotifier, ChangePublisher, NotifierHandle, NotifierStats, NotifierWorker, Snapshot,
    Trigger,
};
pub use store::{InMemoryLedgerStore, LedgerStore, LevelFilter, MovementFilter, StoreError};
pub use stockledger_events::Subscription;
