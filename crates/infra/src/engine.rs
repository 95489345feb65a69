//! Ledger engine: the stock operation handlers.
//!
//! Every operation runs the same pipeline:
//!
//! ```text
//! request
//!   ↓ validate (quantity, reason, distinct warehouses)
//!   ↓ lock affected warehouses (sorted)
//!   ↓ replay check (de-duplication key)
//!   ↓ load warehouses (must exist and be active) and the product
//!   ↓ load current levels → transition → capacity check
//!   ↓ commit levels + movements atomically (expected versions, capacity claims)
//!   ↓ publish LedgerEvent
//! outcome
//! ```
//!
//! A commit that loses an optimistic version check is re-planned from fresh
//! state up to `max_conflict_retries` times. Storage failures are never
//! retried here; they surface as `StorageFailure` for the caller to decide.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument};

use stockledger_core::{ExpectedVersion, MovementId, ProductId, TransferId, WarehouseId};
use stockledger_inventory::{
    AdjustPolicy, AdjustmentReason, LedgerEvent, MovementContext, MovementRecord, MovementType, MutationKind,
    StockChange, StockError, StockKey, StockLevel, Warehouse,
};

use crate::capacity::CapacityGuard;
use crate::config::LedgerConfig;
use crate::deadline::within;
use crate::error::LedgerError;
use crate::locks::WarehouseLocks;
use crate::notifier::ChangePublisher;
use crate::store::{LedgerCommit, LedgerStore, LevelFilter, LevelWrite, MovementFilter, StoreError};

/// Receive, ship, reserve and release requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub context: MovementContext,
    /// Overrides the configured operation timeout.
    pub timeout: Option<Duration>,
}

impl StockRequest {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId, quantity: i64) -> Self {
        Self {
            product_id,
            warehouse_id,
            quantity,
            context: MovementContext::default(),
            timeout: None,
        }
    }

    pub fn with_context(mut self, context: MovementContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.context.dedup_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    /// Signed, non-zero.
    pub delta: i64,
    /// Required; `None` is rejected.
    pub reason: Option<AdjustmentReason>,
    pub policy: AdjustPolicy,
    pub context: MovementContext,
    pub timeout: Option<Duration>,
}

impl AdjustRequest {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId, delta: i64, reason: AdjustmentReason) -> Self {
        Self {
            product_id,
            warehouse_id,
            delta,
            reason: Some(reason),
            policy: AdjustPolicy::default(),
            context: MovementContext::default(),
            timeout: None,
        }
    }

    pub fn with_policy(mut self, policy: AdjustPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_context(mut self, context: MovementContext) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub product_id: ProductId,
    pub from_warehouse_id: WarehouseId,
    pub to_warehouse_id: WarehouseId,
    pub quantity: i64,
    pub context: MovementContext,
    pub timeout: Option<Duration>,
}

impl TransferRequest {
    pub fn new(product_id: ProductId, from: WarehouseId, to: WarehouseId, quantity: i64) -> Self {
        Self {
            product_id,
            from_warehouse_id: from,
            to_warehouse_id: to,
            quantity,
            context: MovementContext::default(),
            timeout: None,
        }
    }

    pub fn with_context(mut self, context: MovementContext) -> Self {
        self.context = context;
        self
    }
}

/// Result of a successful (or replayed) operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    /// Resulting levels; for transfers `[source, destination]`.
    pub levels: Vec<StockLevel>,
    /// Created movements; for transfers `[source leg, destination leg]`.
    pub movements: Vec<MovementRecord>,
    /// Store revision of the commit; `None` for replays.
    pub revision: Option<u64>,
    /// True when the de-duplication key matched an earlier operation.
    pub replayed: bool,
}

impl OperationOutcome {
    pub fn level(&self) -> Option<&StockLevel> {
        self.levels.first()
    }

    pub fn movement(&self) -> Option<&MovementRecord> {
        self.movements.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Receive(i64),
    Ship(i64),
    Adjust {
        delta: i64,
        reason: AdjustmentReason,
        policy: AdjustPolicy,
    },
    Reserve(i64),
    Release(i64),
}

impl Action {
    fn apply(&self, level: &StockLevel) -> Result<StockChange, StockError> {
        match *self {
            Action::Receive(q) => level.receive(q),
            Action::Ship(q) => level.ship(q),
            Action::Adjust { delta, policy, .. } => level.adjust(delta, policy),
            Action::Reserve(q) => level.reserve(q),
            Action::Release(q) => level.release(q),
        }
    }

    fn movement_type(&self) -> MovementType {
        match self {
            Action::Receive(_) => MovementType::Receive,
            Action::Ship(_) => MovementType::Ship,
            Action::Adjust { .. } => MovementType::Adjust,
            Action::Reserve(_) => MovementType::Reserve,
            Action::Release(_) => MovementType::Release,
        }
    }

    fn kind(&self) -> MutationKind {
        match self {
            Action::Receive(_) => MutationKind::Received,
            Action::Ship(_) => MutationKind::Shipped,
            Action::Adjust { .. } => MutationKind::Adjusted,
            Action::Reserve(_) => MutationKind::Reserved,
            Action::Release(_) => MutationKind::Released,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Action::Receive(_) => "receive",
            Action::Ship(_) => "ship",
            Action::Adjust { .. } => "adjust",
            Action::Reserve(_) => "reserve",
            Action::Release(_) => "release",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Single {
        key: StockKey,
        action: Action,
    },
    Transfer {
        product_id: ProductId,
        from: WarehouseId,
        to: WarehouseId,
        quantity: i64,
    },
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Single { action, .. } => action.name(),
            Operation::Transfer { .. } => "transfer",
        }
    }

    fn kind(&self) -> MutationKind {
        match self {
            Operation::Single { action, .. } => action.kind(),
            Operation::Transfer { .. } => MutationKind::Transferred,
        }
    }

    fn movement_type(&self) -> MovementType {
        match self {
            Operation::Single { action, .. } => action.movement_type(),
            Operation::Transfer { .. } => MovementType::Transfer,
        }
    }

    fn product_id(&self) -> ProductId {
        match self {
            Operation::Single { key, .. } => key.product_id,
            Operation::Transfer { product_id, .. } => *product_id,
        }
    }

    fn warehouses(&self) -> Vec<WarehouseId> {
        match self {
            Operation::Single { key, .. } => vec![key.warehouse_id],
            Operation::Transfer { from, to, .. } => vec![*from, *to],
        }
    }

    fn keys(&self) -> Vec<StockKey> {
        match self {
            Operation::Single { key, .. } => vec![*key],
            Operation::Transfer { product_id, from, to, .. } => {
                vec![StockKey::new(*product_id, *from), StockKey::new(*product_id, *to)]
            }
        }
    }

    /// Checks that need no state.
    fn validate(&self) -> Result<(), LedgerError> {
        match *self {
            Operation::Single { action, .. } => match action {
                Action::Receive(q) | Action::Ship(q) | Action::Reserve(q) | Action::Release(q) => positive(q),
                Action::Adjust { delta, .. } => {
                    if delta == 0 {
                        Err(LedgerError::InvalidQuantity(0))
                    } else {
                        Ok(())
                    }
                }
            },
            Operation::Transfer { from, to, quantity, .. } => {
                positive(quantity)?;
                if from == to {
                    return Err(LedgerError::validation("source and destination warehouse must differ"));
                }
                Ok(())
            }
        }
    }
}

fn positive(quantity: i64) -> Result<(), LedgerError> {
    if quantity <= 0 {
        return Err(LedgerError::InvalidQuantity(quantity));
    }
    Ok(())
}

/// The core orchestrator over a `LedgerStore`.
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    publisher: Arc<dyn ChangePublisher>,
    locks: Arc<WarehouseLocks>,
    capacity: CapacityGuard,
    operation_timeout: Duration,
    max_conflict_retries: u32,
    enforce_capacity_on_transfer: bool,
}

impl LedgerEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        publisher: Arc<dyn ChangePublisher>,
        locks: Arc<WarehouseLocks>,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            capacity: CapacityGuard::new(store.clone()),
            store,
            publisher,
            locks,
            operation_timeout: config.operation_timeout(),
            max_conflict_retries: config.max_conflict_retries,
            enforce_capacity_on_transfer: config.enforce_capacity_on_transfer,
        }
    }

    /// Stock-in. Fails with `CapacityExceeded` if the warehouse is full.
    pub async fn receive(&self, req: StockRequest) -> Result<OperationOutcome, LedgerError> {
        self.single(req, Action::Receive).await
    }

    /// Stock-out. Fails with `InsufficientStock` if `quantity > available`.
    pub async fn ship(&self, req: StockRequest) -> Result<OperationOutcome, LedgerError> {
        self.single(req, Action::Ship).await
    }

    /// Earmark available stock. Quantity on hand is unchanged.
    pub async fn reserve(&self, req: StockRequest) -> Result<OperationOutcome, LedgerError> {
        self.single(req, Action::Reserve).await
    }

    /// Return reserved stock to available.
    pub async fn release(&self, req: StockRequest) -> Result<OperationOutcome, LedgerError> {
        self.single(req, Action::Release).await
    }

    /// Signed correction with a reason. Positive deltas are capacity checked;
    /// negative deltas follow the request's `AdjustPolicy`.
    pub async fn adjust(&self, req: AdjustRequest) -> Result<OperationOutcome, LedgerError> {
        let reason = req
            .reason
            .ok_or_else(|| LedgerError::validation("adjustment reason is required"))?;
        let op = Operation::Single {
            key: StockKey::new(req.product_id, req.warehouse_id),
            action: Action::Adjust {
                delta: req.delta,
                reason,
                policy: req.policy,
            },
        };
        self.execute(op, req.context, req.timeout).await
    }

    /// Move stock between warehouses as one atomic pair of movements.
    pub async fn transfer(&self, req: TransferRequest) -> Result<OperationOutcome, LedgerError> {
        let op = Operation::Transfer {
            product_id: req.product_id,
            from: req.from_warehouse_id,
            to: req.to_warehouse_id,
            quantity: req.quantity,
        };
        self.execute(op, req.context, req.timeout).await
    }

    /// Current level; an untouched key reads as empty.
    pub async fn stock_level(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<StockLevel, LedgerError> {
        let key = StockKey::new(product_id, warehouse_id);
        within("stock_level", self.operation_timeout, self.current(key)).await
    }

    /// Stored levels matching `filter`. Keys that were never touched are absent.
    pub async fn levels(&self, filter: LevelFilter) -> Result<Vec<StockLevel>, LedgerError> {
        within("levels", self.operation_timeout, async {
            Ok(self.store.list_levels(filter).await?)
        })
        .await
    }

    pub async fn movements(&self, filter: MovementFilter) -> Result<Vec<MovementRecord>, LedgerError> {
        within("movements", self.operation_timeout, async {
            Ok(self.store.query(filter).await?)
        })
        .await
    }

    /// Sum of every recorded `quantity_delta` for the key. Equals the level's
    /// quantity as long as the ledger is the only writer.
    pub async fn ledger_balance(&self, product_id: ProductId, warehouse_id: WarehouseId) -> Result<i64, LedgerError> {
        let filter = MovementFilter::for_key(StockKey::new(product_id, warehouse_id));
        let records = self.movements(filter).await?;
        records
            .iter()
            .try_fold(0i64, |total, r| total.checked_add(r.quantity_delta))
            .ok_or_else(|| LedgerError::QuantityOverflow(format!("ledger balance of product {product_id}")))
    }

    async fn single(&self, req: StockRequest, action: fn(i64) -> Action) -> Result<OperationOutcome, LedgerError> {
        let op = Operation::Single {
            key: StockKey::new(req.product_id, req.warehouse_id),
            action: action(req.quantity),
        };
        self.execute(op, req.context, req.timeout).await
    }

    #[instrument(
        skip(self, op, context, timeout),
        fields(
            operation = op.name(),
            product_id = %op.product_id(),
            dedup_key = ?context.dedup_key
        ),
        err
    )]
    async fn execute(
        &self,
        op: Operation,
        context: MovementContext,
        timeout: Option<Duration>,
    ) -> Result<OperationOutcome, LedgerError> {
        op.validate()?;
        let after = timeout.unwrap_or(self.operation_timeout);

        let outcome = within(op.name(), after, async {
            let _guard = self.locks.lock(&op.warehouses()).await;

            if let Some(key) = &context.dedup_key {
                if let Some(outcome) = self.replay(&op, key).await? {
                    return Ok(outcome);
                }
            }

            let warehouses = self.active_warehouses(&op.warehouses()).await?;
            self.ensure_product(op.product_id()).await?;

            let outcome = self.commit_with_retry(&op, &warehouses, &context).await?;
            if let Some(revision) = outcome.revision {
                // Still under the warehouse lock: events for one warehouse leave in commit order.
                self.publisher
                    .publish(LedgerEvent::stock(op.kind(), revision, &outcome.movements, Utc::now()));
            }
            Ok(outcome)
        })
        .await?;

        if outcome.replayed {
            info!(operation = op.name(), "replayed de-duplicated operation");
        } else {
            info!(
                operation = op.name(),
                revision = outcome.revision,
                movements = outcome.movements.len(),
                "ledger operation committed"
            );
        }
        Ok(outcome)
    }

    async fn commit_with_retry(
        &self,
        op: &Operation,
        warehouses: &[Warehouse],
        context: &MovementContext,
    ) -> Result<OperationOutcome, LedgerError> {
        let mut attempt = 0;
        loop {
            match self.attempt(op, warehouses, context).await {
                Err(LedgerError::Conflict(msg)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    debug!(operation = op.name(), attempt, reason = %msg, "commit conflict, re-planning");
                }
                result => return result,
            }
        }
    }

    async fn attempt(
        &self,
        op: &Operation,
        warehouses: &[Warehouse],
        context: &MovementContext,
    ) -> Result<OperationOutcome, LedgerError> {
        let recorded_at = Utc::now();
        let mut claims = Vec::new();

        let planned: Vec<(StockChange, MovementRecord)> = match *op {
            Operation::Single { key, action } => {
                let change = action.apply(&self.current(key).await?)?;
                if change.quantity_delta > 0 {
                    let warehouse = find(warehouses, key.warehouse_id)?;
                    claims.extend(self.capacity.check_against(warehouse, change.quantity_delta).await?);
                }

                let mut record =
                    MovementRecord::from_change(MovementId::new(), action.movement_type(), &change, context, recorded_at);
                if let Action::Adjust { reason, .. } = action {
                    record = record.with_reason(reason);
                }
                vec![(change, record)]
            }
            Operation::Transfer {
                product_id,
                from,
                to,
                quantity,
            } => {
                let out = self.current(StockKey::new(product_id, from)).await?.transfer_out(quantity)?;
                let inc = self.current(StockKey::new(product_id, to)).await?.transfer_in(quantity)?;
                if self.enforce_capacity_on_transfer {
                    let destination = find(warehouses, to)?;
                    claims.extend(self.capacity.check_against(destination, inc.quantity_delta).await?);
                }

                let transfer_id = TransferId::new();
                let out_record =
                    MovementRecord::from_change(MovementId::new(), MovementType::Transfer, &out, context, recorded_at)
                        .with_transfer(transfer_id, to);
                let in_record =
                    MovementRecord::from_change(MovementId::new(), MovementType::Transfer, &inc, context, recorded_at)
                        .with_transfer(transfer_id, from);
                vec![(out, out_record), (inc, in_record)]
            }
        };

        let commit = LedgerCommit {
            levels: planned
                .iter()
                .map(|(change, _)| LevelWrite {
                    level: change.after.clone(),
                    expected: ExpectedVersion::Exact(change.before.version),
                })
                .collect(),
            movements: planned.iter().map(|(_, record)| record.clone()).collect(),
            capacity_claims: claims,
            dedup_key: context.dedup_key.clone(),
        };

        match self.store.commit(commit).await {
            Ok(revision) => {
                let (levels, movements): (Vec<_>, Vec<_>) = planned
                    .into_iter()
                    .map(|(change, record)| (change.after, record))
                    .unzip();
                Ok(OperationOutcome {
                    levels,
                    movements,
                    revision: Some(revision),
                    replayed: false,
                })
            }
            // Another writer committed the same key between our check and commit.
            Err(StoreError::DuplicateDedupKey(key)) => self
                .replay(op, &key)
                .await?
                .ok_or_else(|| LedgerError::Conflict(format!("de-duplication key {key} already used"))),
            Err(err) => Err(err.into()),
        }
    }

    /// Outcome of an earlier operation recorded under `dedup_key`, if any.
    async fn replay(&self, op: &Operation, dedup_key: &str) -> Result<Option<OperationOutcome>, LedgerError> {
        let movements = self.store.find_by_dedup_key(dedup_key).await?;
        if movements.is_empty() {
            return Ok(None);
        }

        let mut recorded_keys: Vec<StockKey> = movements.iter().map(MovementRecord::key).collect();
        recorded_keys.sort();
        let mut requested_keys = op.keys();
        requested_keys.sort();
        let same_type = movements.iter().all(|m| m.movement_type == op.movement_type());
        if recorded_keys != requested_keys || !same_type {
            return Err(LedgerError::Conflict(format!(
                "de-duplication key {dedup_key} was used for a different operation"
            )));
        }

        let mut levels = Vec::with_capacity(movements.len());
        for record in &movements {
            levels.push(self.current(record.key()).await?);
        }

        Ok(Some(OperationOutcome {
            levels,
            movements,
            revision: None,
            replayed: true,
        }))
    }

    async fn current(&self, key: StockKey) -> Result<StockLevel, LedgerError> {
        Ok(self.store.get(key).await?.unwrap_or_else(|| StockLevel::empty(key)))
    }

    async fn active_warehouses(&self, ids: &[WarehouseId]) -> Result<Vec<Warehouse>, LedgerError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let warehouse = self
                .store
                .warehouse(*id)
                .await?
                .ok_or_else(|| LedgerError::not_found(format!("warehouse {id}")))?;
            if !warehouse.is_active {
                return Err(LedgerError::validation(format!("warehouse {id} is inactive")));
            }
            out.push(warehouse);
        }
        Ok(out)
    }

    async fn ensure_product(&self, id: ProductId) -> Result<(), LedgerError> {
        match self.store.product(id).await? {
            Some(_) => Ok(()),
            None => Err(LedgerError::not_found(format!("product {id}"))),
        }
    }
}

fn find(warehouses: &[Warehouse], id: WarehouseId) -> Result<&Warehouse, LedgerError> {
    warehouses
        .iter()
        .find(|w| w.id == id)
        .ok_or_else(|| LedgerError::not_found(format!("warehouse {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CatalogStore, InMemoryLedgerStore, MovementLedger, QuantityStore};
    use proptest::prelude::*;
    use stockledger_events::{EventBus, InMemoryEventBus};
    use stockledger_inventory::Product;

    struct Fixture {
        store: Arc<InMemoryLedgerStore>,
        bus: Arc<InMemoryEventBus<LedgerEvent>>,
        locks: Arc<WarehouseLocks>,
        engine: LedgerEngine,
        product: ProductId,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::with_config(LedgerConfig::default()).await
        }

        async fn with_config(config: LedgerConfig) -> Self {
            let store = Arc::new(InMemoryLedgerStore::new());
            let bus = Arc::new(InMemoryEventBus::with_queue_capacity(64));
            let locks = Arc::new(WarehouseLocks::new());
            let engine = LedgerEngine::new(store.clone(), bus.clone(), locks.clone(), &config);
            let product = ProductId::new();
            store
                .put_product(Product::new(product, "Widget", format!("SKU-{product}"), Utc::now()))
                .await
                .unwrap();
            Self {
                store,
                bus,
                locks,
                engine,
                product,
            }
        }

        async fn warehouse(&self, capacity: i64) -> WarehouseId {
            let w = Warehouse::new(WarehouseId::new(), "W", capacity, Utc::now());
            self.store.put_warehouse(w.clone()).await.unwrap();
            w.id
        }

        async fn receive(&self, w: WarehouseId, q: i64) -> Result<OperationOutcome, LedgerError> {
            self.engine.receive(StockRequest::new(self.product, w, q)).await
        }
    }

    #[tokio::test]
    async fn receive_creates_level_and_movement() {
        let f = Fixture::new().await;
        let w = f.warehouse(0).await;

        let out = f.receive(w, 10).await.unwrap();
        let level = out.level().unwrap();
        let record = out.movement().unwrap();

        assert_eq!(level.quantity, 10);
        assert_eq!(record.movement_type, MovementType::Receive);
        assert_eq!((record.previous_qty, record.new_qty), (0, 10));
        assert_eq!(f.engine.stock_level(f.product, w).await.unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn capacity_boundary_from_worked_example() {
        let f = Fixture::new().await;
        let w = f.warehouse(100).await;
        // Another product already fills 90 of 100.
        f.store
            .upsert(StockLevel {
                quantity: 90,
                ..StockLevel::empty(StockKey::new(ProductId::new(), w))
            })
            .await
            .unwrap();

        let err = f.receive(w, 20).await.unwrap_err();
        assert!(matches!(err, LedgerError::CapacityExceeded { .. }));
        assert_eq!(f.engine.stock_level(f.product, w).await.unwrap().quantity, 0);

        let out = f.receive(w, 10).await.unwrap();
        let record = out.movement().unwrap();
        assert_eq!((record.previous_qty, record.new_qty), (0, 10));
    }

    #[tokio::test]
    async fn ship_beyond_stock_fails_without_mutation() {
        let f = Fixture::new().await;
        let w = f.warehouse(0).await;
        f.receive(w, 5).await.unwrap();

        let err = f
            .engine
            .ship(StockRequest::new(f.product, w, 7))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                requested: 7,
                available: 5
            }
        );
        assert_eq!(f.engine.stock_level(f.product, w).await.unwrap().quantity, 5);
        assert_eq!(f.engine.movements(MovementFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn negative_adjust_clamps_and_records_both_deltas() {
        let f = Fixture::new().await;
        let w = f.warehouse(0).await;
        f.receive(w, 3).await.unwrap();

        let out = f
            .engine
            .adjust(AdjustRequest::new(f.product, w, -10, AdjustmentReason::Loss))
            .await
            .unwrap();
        let record = out.movement().unwrap();

        assert_eq!(out.level().unwrap().quantity, 0);
        assert_eq!(record.quantity_delta, -3);
        assert_eq!(record.requested_delta, -10);
        assert_eq!(record.reason_code, Some(AdjustmentReason::Loss));
        assert!(record.is_consistent());
    }

    #[tokio::test]
    async fn adjust_requires_reason() {
        let f = Fixture::new().await;
        let w = f.warehouse(0).await;
        let mut req = AdjustRequest::new(f.product, w, 5, AdjustmentReason::Other);
        req.reason = None;
        let err = f.engine.adjust(req).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn positive_adjust_is_capacity_checked() {
        let f = Fixture::new().await;
        let w = f.warehouse(10).await;
        f.receive(w, 8).await.unwrap();
        let err = f
            .engine
            .adjust(AdjustRequest::new(f.product, w, 5, AdjustmentReason::Correction))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn transfer_moves_stock_with_paired_records() {
        let f = Fixture::new().await;
        let a = f.warehouse(0).await;
        let b = f.warehouse(0).await;
        f.receive(a, 10).await.unwrap();

        let out = f
            .engine
            .transfer(TransferRequest::new(f.product, a, b, 4))
            .await
            .unwrap();

        assert_eq!(out.levels[0].quantity, 6);
        assert_eq!(out.levels[1].quantity, 4);
        let (src, dst) = (&out.movements[0], &out.movements[1]);
        assert_eq!(src.quantity_delta, -4);
        assert_eq!(dst.quantity_delta, 4);
        assert_eq!(src.counterparty_warehouse_id, Some(b));
        assert_eq!(dst.counterparty_warehouse_id, Some(a));
        assert_eq!(src.transfer_id, dst.transfer_id);
        assert!(src.transfer_id.is_some());

        // One receive plus exactly two transfer legs.
        let stored = f.store.query(MovementFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 3);
        let legs: Vec<_> = stored
            .iter()
            .filter(|m| m.movement_type == MovementType::Transfer)
            .collect();
        assert_eq!(legs.len(), 2);
        assert!(legs.iter().all(|m| m.transfer_id == src.transfer_id));
        assert!(legs.iter().any(|m| m.warehouse_id == a && m.quantity_delta == -4));
        assert!(legs.iter().any(|m| m.warehouse_id == b && m.quantity_delta == 4));
    }

    #[tokio::test]
    async fn levels_filter_by_product_or_warehouse() {
        let f = Fixture::new().await;
        let a = f.warehouse(0).await;
        let b = f.warehouse(0).await;
        let other = ProductId::new();
        f.store
            .put_product(Product::new(other, "Gizmo", "SKU-OTHER", Utc::now()))
            .await
            .unwrap();
        f.receive(a, 3).await.unwrap();
        f.receive(b, 5).await.unwrap();
        f.engine.receive(StockRequest::new(other, a, 7)).await.unwrap();

        let in_a = f
            .engine
            .levels(LevelFilter {
                warehouse_id: Some(a),
                ..LevelFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(in_a.len(), 2);
        assert!(in_a.iter().all(|l| l.warehouse_id == a));

        let mut of_product: Vec<i64> = f
            .engine
            .levels(LevelFilter {
                product_id: Some(f.product),
                ..LevelFilter::default()
            })
            .await
            .unwrap()
            .iter()
            .map(|l| l.quantity)
            .collect();
        of_product.sort();
        assert_eq!(of_product, vec![3, 5]);

        assert_eq!(f.engine.levels(LevelFilter::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn receive_past_the_largest_quantity_is_rejected_cleanly() {
        let f = Fixture::new().await;
        let w = f.warehouse(0).await;
        f.receive(w, i64::MAX).await.unwrap();

        let err = f.receive(w, 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::QuantityOverflow(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidQuantity);

        let err = f
            .engine
            .adjust(AdjustRequest::new(f.product, w, i64::MAX, AdjustmentReason::Correction))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::QuantityOverflow(_)));

        let out = f
            .engine
            .adjust(AdjustRequest::new(f.product, w, i64::MIN, AdjustmentReason::Loss))
            .await
            .unwrap();
        assert_eq!(out.level().unwrap().quantity, 0);
        assert_eq!(out.movement().unwrap().quantity_delta, -i64::MAX);

        assert_eq!(f.engine.ledger_balance(f.product, w).await.unwrap(), 0);
        assert_eq!(f.engine.movements(MovementFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transfer_validation() {
        let f = Fixture::new().await;
        let a = f.warehouse(0).await;
        let b = f.warehouse(0).await;
        f.receive(a, 2).await.unwrap();

        let same = f.engine.transfer(TransferRequest::new(f.product, a, a, 1)).await;
        assert!(matches!(same, Err(LedgerError::Validation(_))));

        let zero = f.engine.transfer(TransferRequest::new(f.product, a, b, 0)).await;
        assert!(matches!(zero, Err(LedgerError::InvalidQuantity(0))));

        let short = f.engine.transfer(TransferRequest::new(f.product, a, b, 3)).await;
        assert!(matches!(short, Err(LedgerError::InsufficientStock { .. })));
        assert_eq!(f.engine.stock_level(f.product, b).await.unwrap().quantity, 0);
    }

    #[tokio::test]
    async fn transfer_destination_capacity_is_configurable() {
        let f = Fixture::new().await;
        let a = f.warehouse(0).await;
        let full = f.warehouse(5).await;
        f.receive(a, 10).await.unwrap();
        let err = f.engine.transfer(TransferRequest::new(f.product, a, full, 6)).await;
        assert!(matches!(err, Err(LedgerError::CapacityExceeded { .. })));

        let lax = Fixture::with_config(LedgerConfig::default().with_capacity_on_transfer(false)).await;
        let a = lax.warehouse(0).await;
        let full = lax.warehouse(5).await;
        lax.receive(a, 10).await.unwrap();
        lax.engine
            .transfer(TransferRequest::new(lax.product, a, full, 6))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn replay_without_key_duplicates_with_key_does_not() {
        let f = Fixture::new().await;
        let w = f.warehouse(0).await;

        f.receive(w, 5).await.unwrap();
        f.receive(w, 5).await.unwrap();
        assert_eq!(f.engine.stock_level(f.product, w).await.unwrap().quantity, 10);
        assert_eq!(f.engine.movements(MovementFilter::default()).await.unwrap().len(), 2);

        let req = StockRequest::new(f.product, w, 5).with_dedup_key("po-77");
        let first = f.engine.receive(req.clone()).await.unwrap();
        let second = f.engine.receive(req).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.movements, second.movements);
        assert_eq!(f.engine.stock_level(f.product, w).await.unwrap().quantity, 15);
    }

    #[tokio::test]
    async fn dedup_key_reused_for_other_operation_conflicts() {
        let f = Fixture::new().await;
        let w = f.warehouse(0).await;
        f.engine
            .receive(StockRequest::new(f.product, w, 5).with_dedup_key("k"))
            .await
            .unwrap();
        let err = f
            .engine
            .ship(StockRequest::new(f.product, w, 1).with_dedup_key("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn reserve_limits_shipping() {
        let f = Fixture::new().await;
        let w = f.warehouse(0).await;
        f.receive(w, 10).await.unwrap();

        let out = f.engine.reserve(StockRequest::new(f.product, w, 8)).await.unwrap();
        assert_eq!(out.movement().unwrap().quantity_delta, 0);
        assert_eq!(out.movement().unwrap().reserved_delta, 8);

        let err = f.engine.ship(StockRequest::new(f.product, w, 3)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock { available: 2, .. }));

        f.engine.release(StockRequest::new(f.product, w, 8)).await.unwrap();
        f.engine.ship(StockRequest::new(f.product, w, 3)).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_or_inactive_targets_are_rejected() {
        let f = Fixture::new().await;
        let missing = f.receive(WarehouseId::new(), 1).await.unwrap_err();
        assert!(matches!(missing, LedgerError::NotFound(_)));

        let w = f.warehouse(0).await;
        let mut warehouse = f.store.warehouse(w).await.unwrap().unwrap();
        warehouse.is_active = false;
        f.store.put_warehouse(warehouse).await.unwrap();
        let inactive = f.receive(w, 1).await.unwrap_err();
        assert!(matches!(inactive, LedgerError::Validation(_)));

        let other = StockRequest::new(ProductId::new(), f.warehouse(0).await, 1);
        assert!(matches!(f.engine.receive(other).await, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn committed_operations_publish_events() {
        let f = Fixture::new().await;
        let sub = f.bus.subscribe();
        let w = f.warehouse(0).await;

        f.receive(w, 3).await.unwrap();
        let _ = f.engine.ship(StockRequest::new(f.product, w, 9)).await;

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, MutationKind::Received);
        assert_eq!(events[0].warehouses, vec![w]);
    }

    #[tokio::test]
    async fn out_of_band_version_bump_is_respected() {
        let f = Fixture::new().await;
        let w = f.warehouse(0).await;
        f.receive(w, 5).await.unwrap();

        // Out-of-band write bumps the version; the next commit builds on it.
        let key = StockKey::new(f.product, w);
        let mut level = f.store.get(key).await.unwrap().unwrap();
        level.version += 5;
        f.store.upsert(level).await.unwrap();

        let out = f.receive(w, 1).await.unwrap();
        assert_eq!(out.level().unwrap().quantity, 6);
        assert_eq!(out.level().unwrap().version, 7);
    }

    #[tokio::test]
    async fn concurrent_receives_serialize() {
        let f = Arc::new(Fixture::new().await);
        let w = f.warehouse(0).await;

        let mut tasks = Vec::new();
        for _ in 0..25 {
            let f = f.clone();
            tasks.push(tokio::spawn(async move { f.receive(w, 2).await.map(|_| ()) }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert_eq!(f.engine.stock_level(f.product, w).await.unwrap().quantity, 50);
        assert_eq!(f.engine.ledger_balance(f.product, w).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn concurrent_receives_never_exceed_capacity() {
        let f = Arc::new(Fixture::new().await);
        let w = f.warehouse(30).await;

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let f = f.clone();
            tasks.push(tokio::spawn(async move { f.receive(w, 2).await.is_ok() }));
        }
        let mut ok = 0;
        for t in tasks {
            if t.await.unwrap() {
                ok += 1;
            }
        }

        assert_eq!(ok, 15);
        assert_eq!(f.store.warehouse_total(w).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn blocked_operation_times_out_without_effect() {
        let f = Fixture::new().await;
        let w = f.warehouse(0).await;
        let held = f.locks.lock(&[w]).await;

        let req = StockRequest::new(f.product, w, 4).with_timeout(Duration::from_millis(20));
        let err = f.engine.receive(req).await.unwrap_err();
        assert!(matches!(err, LedgerError::Timeout { operation: "receive", .. }));
        drop(held);

        assert_eq!(f.engine.stock_level(f.product, w).await.unwrap().quantity, 0);
        assert!(f.engine.movements(MovementFilter::default()).await.unwrap().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Receive(i64),
        Ship(i64),
        Adjust(i64),
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            .. ProptestConfig::default()
        })]

        #[test]
        fn level_always_equals_ledger_sum(ops in proptest::collection::vec(
            prop_oneof![
                (1i64..20).prop_map(Op::Receive),
                (1i64..20).prop_map(Op::Ship),
                (-25i64..25).prop_filter("non-zero", |d| *d != 0).prop_map(Op::Adjust),
            ],
            1..30,
        )) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let f = Fixture::new().await;
                let w = f.warehouse(0).await;
                for op in ops {
                    let _ = match op {
                        Op::Receive(q) => f.receive(w, q).await,
                        Op::Ship(q) => f.engine.ship(StockRequest::new(f.product, w, q)).await,
                        Op::Adjust(d) => f.engine.adjust(AdjustRequest::new(f.product, w, d, AdjustmentReason::Correction)).await,
                    };
                }
                let level = f.engine.stock_level(f.product, w).await.unwrap();
                let balance = f.engine.ledger_balance(f.product, w).await.unwrap();
                assert_eq!(level.quantity, balance);
                assert!(level.quantity >= 0);
                for record in f.engine.movements(MovementFilter::default()).await.unwrap() {
                    assert!(record.is_consistent());
                }
            });
        }
    }
}
