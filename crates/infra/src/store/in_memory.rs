//! In-memory ledger store for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use stockledger_core::{MovementId, ProductId, WarehouseId};
use stockledger_inventory::{MovementRecord, Product, StockKey, StockLevel, Topic, Warehouse};

use super::{
    CatalogStore, ChangeSet, LedgerCommit, LedgerStore, LevelFilter, MovementFilter, MovementLedger,
    QuantityStore, StoreError, validate_commit,
};

#[derive(Debug, Default)]
struct State {
    revision: u64,
    levels: HashMap<StockKey, StockLevel>,
    movements: Vec<MovementRecord>,
    movement_ids: HashSet<MovementId>,
    /// De-duplication key -> indices into `movements`.
    dedup: HashMap<String, Vec<usize>>,
    warehouses: HashMap<WarehouseId, Warehouse>,
    products: HashMap<ProductId, Product>,
    topic_revisions: HashMap<Topic, u64>,
}

impl State {
    fn warehouse_total(&self, warehouse_id: WarehouseId) -> Result<i64, StoreError> {
        self.levels
            .values()
            .filter(|l| l.warehouse_id == warehouse_id)
            .try_fold(0i64, |total, l| total.checked_add(l.quantity))
            .ok_or_else(|| StoreError::Overflow(format!("total of warehouse {warehouse_id}")))
    }

    fn bump(&mut self, topics: &[Topic]) -> u64 {
        self.revision += 1;
        for topic in topics {
            self.topic_revisions.insert(*topic, self.revision);
        }
        self.revision
    }

    fn push_movements(&mut self, records: Vec<MovementRecord>) {
        for record in records {
            let idx = self.movements.len();
            if let Some(key) = &record.dedup_key {
                self.dedup.entry(key.clone()).or_default().push(idx);
            }
            self.movement_ids.insert(record.id);
            self.movements.push(record);
        }
    }

    fn ensure_new_ids(&self, records: &[MovementRecord]) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for record in records {
            if self.movement_ids.contains(&record.id) || !seen.insert(record.id) {
                return Err(StoreError::InvalidWrite(format!("movement {} already recorded", record.id)));
            }
        }
        Ok(())
    }
}

/// Single-process store keeping all state behind one lock.
///
/// Every `commit` runs its checks and writes under the write lock, so the
/// capacity re-check and the level write cannot interleave with another commit.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl QuantityStore for InMemoryLedgerStore {
    async fn get(&self, key: StockKey) -> Result<Option<StockLevel>, StoreError> {
        Ok(self.read()?.levels.get(&key).cloned())
    }

    async fn upsert(&self, level: StockLevel) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.levels.insert(level.key(), level);
        state.bump(&[Topic::StockLevels, Topic::Warehouses]);
        Ok(())
    }

    async fn warehouse_total(&self, warehouse_id: WarehouseId) -> Result<i64, StoreError> {
        self.read()?.warehouse_total(warehouse_id)
    }

    async fn list_levels(&self, filter: LevelFilter) -> Result<Vec<StockLevel>, StoreError> {
        let state = self.read()?;
        let mut levels: Vec<StockLevel> = state
            .levels
            .values()
            .filter(|l| filter.product_id.is_none_or(|p| l.product_id == p))
            .filter(|l| filter.warehouse_id.is_none_or(|w| l.warehouse_id == w))
            .cloned()
            .collect();
        levels.sort_by_key(|l| l.key());
        Ok(levels)
    }
}

#[async_trait]
impl MovementLedger for InMemoryLedgerStore {
    async fn append(&self, records: Vec<MovementRecord>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(bad) = records.iter().find(|r| !r.is_consistent()) {
            return Err(StoreError::InvalidWrite(format!("movement {} is inconsistent", bad.id)));
        }

        let mut state = self.write()?;
        state.ensure_new_ids(&records)?;
        state.push_movements(records);
        state.bump(&[Topic::Movements]);
        Ok(())
    }

    async fn query(&self, filter: MovementFilter) -> Result<Vec<MovementRecord>, StoreError> {
        let state = self.read()?;
        // Reverse insertion order first so ties on timestamps stay newest first.
        let mut out: Vec<MovementRecord> = state
            .movements
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.recorded_at.cmp(&a.recorded_at))
        });
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Vec<MovementRecord>, StoreError> {
        let state = self.read()?;
        Ok(state
            .dedup
            .get(dedup_key)
            .map(|idxs| idxs.iter().map(|i| state.movements[*i].clone()).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CatalogStore for InMemoryLedgerStore {
    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        Ok(self.read()?.warehouses.get(&id).cloned())
    }

    async fn put_warehouse(&self, warehouse: Warehouse) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        state.warehouses.insert(warehouse.id, warehouse);
        Ok(state.bump(&[Topic::Warehouses]))
    }

    async fn list_warehouses(&self) -> Result<Vec<Warehouse>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<Warehouse> = state.warehouses.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    async fn put_product(&self, product: Product) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let sku_taken = state
            .products
            .values()
            .any(|p| p.id != product.id && p.sku == product.sku);
        if sku_taken {
            return Err(StoreError::Conflict(format!("sku {} already in use", product.sku)));
        }
        state.products.insert(product.id, product);
        Ok(state.bump(&[Topic::Products]))
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<Product> = state.products.values().cloned().collect();
        out.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn commit(&self, commit: LedgerCommit) -> Result<u64, StoreError> {
        validate_commit(&commit)?;

        let mut state = self.write()?;

        if let Some(key) = &commit.dedup_key {
            if state.dedup.contains_key(key) {
                return Err(StoreError::DuplicateDedupKey(key.clone()));
            }
        }

        for write in &commit.levels {
            let key = write.level.key();
            let actual = state.levels.get(&key).map(|l| l.version).unwrap_or(0);
            if !write.expected.matches(actual) {
                return Err(StoreError::VersionConflict {
                    key,
                    expected: write.expected,
                    actual,
                });
            }
        }

        for claim in &commit.capacity_claims {
            let warehouse = state
                .warehouses
                .get(&claim.warehouse_id)
                .ok_or_else(|| StoreError::NotFound(format!("warehouse {}", claim.warehouse_id)))?;
            let current_total = state.warehouse_total(claim.warehouse_id)?;
            if !warehouse.admits(current_total, claim.delta) {
                return Err(StoreError::CapacityExceeded {
                    warehouse_id: claim.warehouse_id,
                    capacity: warehouse.capacity,
                    current_total,
                    requested: claim.delta,
                });
            }
        }

        state.ensure_new_ids(&commit.movements)?;

        let on_hand_changed = commit.movements.iter().any(|m| m.quantity_delta != 0);
        for write in commit.levels {
            state.levels.insert(write.level.key(), write.level);
        }
        state.push_movements(commit.movements);

        let revision = if on_hand_changed {
            state.bump(&[Topic::Movements, Topic::StockLevels, Topic::Warehouses])
        } else {
            state.bump(&[Topic::Movements, Topic::StockLevels])
        };
        Ok(revision)
    }

    async fn revision(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.revision)
    }

    async fn changes_since(&self, revision: u64) -> Result<ChangeSet, StoreError> {
        let state = self.read()?;
        let mut topics: Vec<(Topic, u64)> = state
            .topic_revisions
            .iter()
            .filter(|(_, rev)| **rev > revision)
            .map(|(topic, rev)| (*topic, *rev))
            .collect();
        topics.sort();
        Ok(ChangeSet {
            latest: state.revision,
            topics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CapacityClaim, LevelWrite};
    use chrono::{Duration, Utc};
    use stockledger_core::ExpectedVersion;
    use stockledger_inventory::{MovementContext, MovementType};

    fn warehouse(capacity: i64) -> Warehouse {
        Warehouse::new(WarehouseId::new(), "Main", capacity, Utc::now())
    }

    fn receive(level: &StockLevel, quantity: i64, dedup_key: Option<&str>) -> LedgerCommit {
        let change = level.receive(quantity).unwrap();
        let context = MovementContext {
            dedup_key: dedup_key.map(str::to_string),
            ..Default::default()
        };
        let record = MovementRecord::from_change(MovementId::new(), MovementType::Receive, &change, &context, Utc::now());
        LedgerCommit {
            levels: vec![LevelWrite {
                level: change.after.clone(),
                expected: ExpectedVersion::Exact(change.before.version),
            }],
            movements: vec![record],
            capacity_claims: vec![CapacityClaim {
                warehouse_id: level.warehouse_id,
                delta: quantity,
            }],
            dedup_key: dedup_key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn commit_writes_level_and_movement_together() {
        let store = InMemoryLedgerStore::new();
        let w = warehouse(0);
        store.put_warehouse(w.clone()).await.unwrap();
        let key = StockKey::new(ProductId::new(), w.id);

        let rev = store.commit(receive(&StockLevel::empty(key), 10, None)).await.unwrap();

        let level = store.get(key).await.unwrap().unwrap();
        assert_eq!(level.quantity, 10);
        assert_eq!(level.version, 1);
        let movements = store.query(MovementFilter::for_key(key)).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].new_qty, 10);
        assert_eq!(store.revision().await.unwrap(), rev);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_writing() {
        let store = InMemoryLedgerStore::new();
        let w = warehouse(0);
        store.put_warehouse(w.clone()).await.unwrap();
        let key = StockKey::new(ProductId::new(), w.id);
        let empty = StockLevel::empty(key);

        store.commit(receive(&empty, 10, None)).await.unwrap();
        let err = store.commit(receive(&empty, 5, None)).await.unwrap_err();

        assert!(matches!(err, StoreError::VersionConflict { actual: 1, .. }));
        assert_eq!(store.get(key).await.unwrap().unwrap().quantity, 10);
        assert_eq!(store.query(MovementFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn capacity_is_rechecked_inside_commit() {
        let store = InMemoryLedgerStore::new();
        let w = warehouse(100);
        store.put_warehouse(w.clone()).await.unwrap();
        let other = StockKey::new(ProductId::new(), w.id);
        store
            .upsert(StockLevel {
                quantity: 90,
                ..StockLevel::empty(other)
            })
            .await
            .unwrap();

        let key = StockKey::new(ProductId::new(), w.id);
        let err = store.commit(receive(&StockLevel::empty(key), 20, None)).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::CapacityExceeded {
                current_total: 90,
                requested: 20,
                ..
            }
        ));

        store.commit(receive(&StockLevel::empty(key), 10, None)).await.unwrap();
        assert_eq!(store.warehouse_total(w.id).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn overflowing_warehouse_total_is_an_error() {
        let store = InMemoryLedgerStore::new();
        let w = warehouse(0);
        store.put_warehouse(w.clone()).await.unwrap();
        for _ in 0..2 {
            store
                .upsert(StockLevel {
                    quantity: i64::MAX,
                    ..StockLevel::empty(StockKey::new(ProductId::new(), w.id))
                })
                .await
                .unwrap();
        }

        let err = store.warehouse_total(w.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Overflow(_)));

        // Claims against the same warehouse fail the same way and write nothing.
        let key = StockKey::new(ProductId::new(), w.id);
        let err = store.commit(receive(&StockLevel::empty(key), 1, None)).await.unwrap_err();
        assert!(matches!(err, StoreError::Overflow(_)));
        assert!(store.get(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dedup_key_can_only_be_committed_once() {
        let store = InMemoryLedgerStore::new();
        let w = warehouse(0);
        store.put_warehouse(w.clone()).await.unwrap();
        let key = StockKey::new(ProductId::new(), w.id);

        store.commit(receive(&StockLevel::empty(key), 3, Some("req-1"))).await.unwrap();
        let level = store.get(key).await.unwrap().unwrap();
        let err = store.commit(receive(&level, 3, Some("req-1"))).await.unwrap_err();

        assert!(matches!(err, StoreError::DuplicateDedupKey(k) if k == "req-1"));
        assert_eq!(store.find_by_dedup_key("req-1").await.unwrap().len(), 1);
        assert!(store.find_by_dedup_key("req-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_orders_newest_first_and_limits() {
        let store = InMemoryLedgerStore::new();
        let key = StockKey::new(ProductId::new(), WarehouseId::new());
        let base = Utc::now();

        let mut level = StockLevel::empty(key);
        let mut records = Vec::new();
        for i in 0..3 {
            let change = level.receive(1).unwrap();
            let context = MovementContext {
                occurred_at: Some(base + Duration::seconds(i)),
                ..Default::default()
            };
            records.push(MovementRecord::from_change(
                MovementId::new(),
                MovementType::Receive,
                &change,
                &context,
                base,
            ));
            level = change.after;
        }
        store.append(records).await.unwrap();

        let newest = store
            .query(MovementFilter {
                limit: Some(2),
                ..MovementFilter::for_key(key)
            })
            .await
            .unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].new_qty, 3);
        assert_eq!(newest[1].new_qty, 2);
    }

    #[tokio::test]
    async fn sku_must_be_unique() {
        let store = InMemoryLedgerStore::new();
        let a = Product::new(ProductId::new(), "A", "SKU-1", Utc::now());
        let b = Product::new(ProductId::new(), "B", "SKU-1", Utc::now());
        store.put_product(a.clone()).await.unwrap();
        assert!(matches!(store.put_product(b).await, Err(StoreError::Conflict(_))));
        // Re-putting the same product is an update.
        store.put_product(a).await.unwrap();
    }

    #[tokio::test]
    async fn changes_since_reports_touched_topics() {
        let store = InMemoryLedgerStore::new();
        let start = store.revision().await.unwrap();
        store
            .put_product(Product::new(ProductId::new(), "A", "SKU-1", Utc::now()))
            .await
            .unwrap();

        let changes = store.changes_since(start).await.unwrap();
        assert_eq!(changes.topics.len(), 1);
        assert_eq!(changes.topics[0].0, Topic::Products);

        let none = store.changes_since(changes.latest).await.unwrap();
        assert!(none.topics.is_empty());
    }
}
