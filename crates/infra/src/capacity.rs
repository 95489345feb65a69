//! Capacity guard: validates a prospective stock increase before commit.

use std::sync::Arc;

use tracing::debug;

use stockledger_core::WarehouseId;
use stockledger_inventory::Warehouse;

use crate::error::LedgerError;
use crate::store::{CapacityClaim, LedgerStore};

/// Pre-commit capacity check.
///
/// The check alone does not close the check-then-write window; callers hold the
/// warehouse lock across check and commit and attach the returned claim to the
/// commit so the store re-validates it atomically.
#[derive(Clone)]
pub struct CapacityGuard {
    store: Arc<dyn LedgerStore>,
}

impl CapacityGuard {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Check `proposed_delta` against the stored warehouse.
    pub async fn check_capacity(
        &self,
        warehouse_id: WarehouseId,
        proposed_delta: i64,
    ) -> Result<Option<CapacityClaim>, LedgerError> {
        let warehouse = self
            .store
            .warehouse(warehouse_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("warehouse {warehouse_id}")))?;
        self.check_against(&warehouse, proposed_delta).await
    }

    /// Check `proposed_delta` against an already loaded warehouse.
    ///
    /// Returns `None` when no claim is needed: decreases and unconstrained
    /// warehouses never exceed capacity.
    pub async fn check_against(
        &self,
        warehouse: &Warehouse,
        proposed_delta: i64,
    ) -> Result<Option<CapacityClaim>, LedgerError> {
        if proposed_delta <= 0 || !warehouse.is_constrained() {
            return Ok(None);
        }

        let current_total = self.store.warehouse_total(warehouse.id).await?;
        if !warehouse.admits(current_total, proposed_delta) {
            debug!(
                warehouse_id = %warehouse.id,
                capacity = warehouse.capacity,
                current_total,
                proposed_delta,
                "capacity check failed"
            );
            return Err(LedgerError::CapacityExceeded {
                warehouse_id: warehouse.id,
                capacity: warehouse.capacity,
                current_total,
                requested: proposed_delta,
            });
        }

        Ok(Some(CapacityClaim {
            warehouse_id: warehouse.id,
            delta: proposed_delta,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CatalogStore, InMemoryLedgerStore, QuantityStore};
    use chrono::Utc;
    use stockledger_core::ProductId;
    use stockledger_inventory::{StockKey, StockLevel};

    async fn setup(capacity: i64, total: i64) -> (CapacityGuard, Warehouse) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let warehouse = Warehouse::new(WarehouseId::new(), "Main", capacity, Utc::now());
        store.put_warehouse(warehouse.clone()).await.unwrap();
        store
            .upsert(StockLevel {
                quantity: total,
                ..StockLevel::empty(StockKey::new(ProductId::new(), warehouse.id))
            })
            .await
            .unwrap();
        (CapacityGuard::new(store), warehouse)
    }

    #[tokio::test]
    async fn increase_beyond_capacity_is_rejected() {
        let (guard, w) = setup(100, 90).await;
        let err = guard.check_capacity(w.id, 20).await.unwrap_err();
        assert!(matches!(err, LedgerError::CapacityExceeded { current_total: 90, .. }));

        let claim = guard.check_capacity(w.id, 10).await.unwrap();
        assert_eq!(claim, Some(CapacityClaim { warehouse_id: w.id, delta: 10 }));
    }

    #[tokio::test]
    async fn zero_capacity_and_decreases_need_no_claim() {
        let (guard, w) = setup(0, 1_000).await;
        assert_eq!(guard.check_capacity(w.id, 5_000).await.unwrap(), None);

        let (guard, w) = setup(100, 100).await;
        assert_eq!(guard.check_capacity(w.id, -5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_warehouse_is_not_found() {
        let (guard, _) = setup(100, 0).await;
        let err = guard.check_capacity(WarehouseId::new(), 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }
}
