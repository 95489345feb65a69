//! Storage boundary for the ledger.
//!
//! The traits split storage by concern (quantities, movements, catalog) and
//! `LedgerStore` ties them together with the one write path the engine uses:
//! an atomic [`LedgerCommit`].
//!
//! ## Commit semantics
//!
//! `commit()` applies every level write and appends every movement, or does
//! nothing. Inside the same atomic boundary implementations must:
//! - check each level's `ExpectedVersion` (absent levels are at version 0)
//! - re-check every capacity claim against the committed warehouse totals
//! - reject a de-duplication key that is already recorded
//! - verify each movement's `new_qty` matches the level written for its key
//!
//! Each successful commit, product write or warehouse write advances a single
//! store-wide revision. `changes_since()` reports which topics moved past a
//! given revision; the notifier sweep is built on it.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use stockledger_core::{ExpectedVersion, ProductId, WarehouseId};
use stockledger_inventory::{MovementRecord, MovementType, Product, StockKey, StockLevel, Topic, Warehouse};

pub use in_memory::InMemoryLedgerStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresLedgerStore;

/// Storage-facing error.
///
/// Backend messages stay inside this type; `LedgerError` decides what callers see.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version conflict on {key}: expected {expected:?}, found {actual}")]
    VersionConflict {
        key: StockKey,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error(
        "capacity exceeded for warehouse {warehouse_id}: capacity {capacity}, current {current_total}, requested {requested}"
    )]
    CapacityExceeded {
        warehouse_id: WarehouseId,
        capacity: i64,
        current_total: i64,
        requested: i64,
    },

    #[error("de-duplication key already recorded: {0}")]
    DuplicateDedupKey(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A sum of quantities does not fit in `i64`.
    #[error("quantity overflow in {0}")]
    Overflow(String),

    #[error("invalid write: {0}")]
    InvalidWrite(String),

    #[error("backend failure in {operation}: {message}")]
    Backend { operation: &'static str, message: String },

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            message: message.into(),
        }
    }
}

/// One stock level write inside a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelWrite {
    pub level: StockLevel,
    pub expected: ExpectedVersion,
}

/// An increase of a warehouse's total that must fit its capacity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CapacityClaim {
    pub warehouse_id: WarehouseId,
    pub delta: i64,
}

/// Everything one ledger operation writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerCommit {
    pub levels: Vec<LevelWrite>,
    pub movements: Vec<MovementRecord>,
    pub capacity_claims: Vec<CapacityClaim>,
    pub dedup_key: Option<String>,
}

/// Movement query; all filters are optional and combine with AND.
///
/// Results are newest first (`occurred_at`, then `recorded_at`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    pub movement_type: Option<MovementType>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl MovementFilter {
    pub fn for_key(key: StockKey) -> Self {
        Self {
            product_id: Some(key.product_id),
            warehouse_id: Some(key.warehouse_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &MovementRecord) -> bool {
        self.product_id.is_none_or(|p| record.product_id == p)
            && self.warehouse_id.is_none_or(|w| record.warehouse_id == w)
            && self.movement_type.is_none_or(|t| record.movement_type == t)
            && self.occurred_after.is_none_or(|t| record.occurred_at >= t)
            && self.occurred_before.is_none_or(|t| record.occurred_at <= t)
    }
}

/// Stock level listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
}

/// Topics that changed after some revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Store revision at the time of the query.
    pub latest: u64,
    /// Changed topics with the revision of their most recent change.
    pub topics: Vec<(Topic, u64)>,
}

#[async_trait]
pub trait QuantityStore: Send + Sync {
    /// Current level for `key`, or `None` if nothing was ever written.
    async fn get(&self, key: StockKey) -> Result<Option<StockLevel>, StoreError>;

    /// Create or replace a level without validation (seeding, repair).
    async fn upsert(&self, level: StockLevel) -> Result<(), StoreError>;

    /// Sum of `quantity` across all products in a warehouse.
    async fn warehouse_total(&self, warehouse_id: WarehouseId) -> Result<i64, StoreError>;

    async fn list_levels(&self, filter: LevelFilter) -> Result<Vec<StockLevel>, StoreError>;
}

#[async_trait]
pub trait MovementLedger: Send + Sync {
    /// Append records outside a commit (imports). Ids must be new.
    async fn append(&self, records: Vec<MovementRecord>) -> Result<(), StoreError>;

    async fn query(&self, filter: MovementFilter) -> Result<Vec<MovementRecord>, StoreError>;

    /// Records written by the operation that carried `dedup_key`, oldest first.
    async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Vec<MovementRecord>, StoreError>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError>;

    /// Insert or replace a warehouse; returns the new store revision.
    async fn put_warehouse(&self, warehouse: Warehouse) -> Result<u64, StoreError>;

    async fn list_warehouses(&self) -> Result<Vec<Warehouse>, StoreError>;

    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Insert or replace a product; SKUs are unique. Returns the new store revision.
    async fn put_product(&self, product: Product) -> Result<u64, StoreError>;

    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;
}

#[async_trait]
pub trait LedgerStore: QuantityStore + MovementLedger + CatalogStore {
    /// Atomically apply `commit`; returns the new store revision.
    async fn commit(&self, commit: LedgerCommit) -> Result<u64, StoreError>;

    async fn revision(&self) -> Result<u64, StoreError>;

    async fn changes_since(&self, revision: u64) -> Result<ChangeSet, StoreError>;
}

/// Reject a commit whose movements disagree with its level writes.
pub(crate) fn validate_commit(commit: &LedgerCommit) -> Result<(), StoreError> {
    for record in &commit.movements {
        if !record.is_consistent() {
            return Err(StoreError::InvalidWrite(format!(
                "movement {} has new_qty {} != previous_qty {} + delta {}",
                record.id, record.new_qty, record.previous_qty, record.quantity_delta
            )));
        }

        let level = commit
            .levels
            .iter()
            .find(|w| w.level.key() == record.key())
            .ok_or_else(|| {
                StoreError::InvalidWrite(format!("movement {} has no level write for {}", record.id, record.key()))
            })?;

        if level.level.quantity != record.new_qty {
            return Err(StoreError::InvalidWrite(format!(
                "movement {} new_qty {} != committed quantity {}",
                record.id, record.new_qty, level.level.quantity
            )));
        }
    }

    for write in &commit.levels {
        let level = &write.level;
        if level.quantity < 0 || level.reserved < 0 || level.reserved > level.quantity {
            return Err(StoreError::InvalidWrite(format!(
                "level {} violates 0 <= reserved ({}) <= quantity ({})",
                level.key(),
                level.reserved,
                level.quantity
            )));
        }
    }

    if commit.dedup_key.is_some() && commit.movements.iter().any(|m| m.dedup_key != commit.dedup_key) {
        return Err(StoreError::InvalidWrite("movements must carry the commit's de-duplication key".into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use stockledger_core::MovementId;
    use stockledger_inventory::{MovementContext, MovementType};

    fn receive_commit(quantity_in_level: i64) -> LedgerCommit {
        let key = StockKey::new(ProductId::new(), WarehouseId::new());
        let change = StockLevel::empty(key).receive(5).unwrap();
        let record = MovementRecord::from_change(
            MovementId::new(),
            MovementType::Receive,
            &change,
            &MovementContext::default(),
            Utc.timestamp_opt(0, 0).single().unwrap(),
        );
        let mut level = change.after.clone();
        level.quantity = quantity_in_level;
        LedgerCommit {
            levels: vec![LevelWrite {
                level,
                expected: ExpectedVersion::Exact(0),
            }],
            movements: vec![record],
            ..LedgerCommit::default()
        }
    }

    #[test]
    fn consistent_commit_passes() {
        assert!(validate_commit(&receive_commit(5)).is_ok());
    }

    #[test]
    fn movement_must_match_committed_quantity() {
        let err = validate_commit(&receive_commit(6)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidWrite(_)));
    }

    #[test]
    fn filter_matches_on_every_field() {
        let commit = receive_commit(5);
        let record = &commit.movements[0];
        assert!(MovementFilter::for_key(record.key()).matches(record));

        let wrong_type = MovementFilter {
            movement_type: Some(MovementType::Ship),
            ..MovementFilter::default()
        };
        assert!(!wrong_type.matches(record));

        let too_late = MovementFilter {
            occurred_after: Some(Utc.timestamp_opt(10, 0).single().unwrap()),
            ..MovementFilter::default()
        };
        assert!(!too_late.matches(record));
    }
}
