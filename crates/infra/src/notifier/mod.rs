//! Change notifier: fans committed mutations out to watchers.
//!
//! ```text
//! engine/catalog commit ─ publish(LedgerEvent) ─► bounded intake ─► worker ─► topic bus ─► watchers
//!                                                                   ▲
//!                                          sweep every N ms ────────┘ (changes_since)
//! ```
//!
//! - **Immediate path**: every commit publishes a `LedgerEvent`; the worker turns
//!   it into one notification per affected topic carrying the post-mutation
//!   collection.
//! - **Sweep path**: the worker periodically asks the store which topics changed
//!   since its cursor and re-notifies any topic the immediate path has not yet
//!   covered (dropped intake events, writes from other processes).
//! - **Best-effort**: `publish()` never blocks a writer; a full intake queue or a
//!   full watcher queue drops the message. Delivery is at-least-once overall, so
//!   watchers must tolerate duplicates.

mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use stockledger_events::{EventBus, InMemoryEventBus, Subscription};
use stockledger_inventory::{LedgerEvent, MovementRecord, Product, StockLevel, Topic, WarehouseUtilization};

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::store::{LedgerStore, LevelFilter, MovementFilter};

pub use worker::{NotifierHandle, NotifierWorker};

/// Sink for committed mutations. Implementations must not block.
pub trait ChangePublisher: Send + Sync {
    fn publish(&self, event: LedgerEvent);
}

/// Direct bus publishing, for consumers that want raw events.
impl ChangePublisher for InMemoryEventBus<LedgerEvent> {
    fn publish(&self, event: LedgerEvent) {
        if let Err(err) = EventBus::publish(self, event) {
            warn!(error = ?err, "ledger event bus publish failed");
        }
    }
}

/// Full post-mutation state of one topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topic", content = "items", rename_all = "snake_case")]
pub enum Snapshot {
    Products(Vec<Product>),
    Warehouses(Vec<WarehouseUtilization>),
    Movements(Vec<MovementRecord>),
    StockLevels(Vec<StockLevel>),
}

impl Snapshot {
    pub fn topic(&self) -> Topic {
        match self {
            Snapshot::Products(_) => Topic::Products,
            Snapshot::Warehouses(_) => Topic::Warehouses,
            Snapshot::Movements(_) => Topic::Movements,
            Snapshot::StockLevels(_) => Topic::StockLevels,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Snapshot::Products(v) => v.len(),
            Snapshot::Warehouses(v) => v.len(),
            Snapshot::Movements(v) => v.len(),
            Snapshot::StockLevels(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Produced right after a commit.
    Immediate { event: LedgerEvent },
    /// Produced by the reconciliation sweep.
    Sweep,
}

/// What a watcher receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeNotification {
    pub topic: Topic,
    /// Store revision observed before the snapshot was read; the snapshot
    /// reflects at least this revision.
    pub revision: u64,
    pub trigger: Trigger,
    pub snapshot: Snapshot,
}

/// Delivery counters since the notifier was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotifierStats {
    pub events_received: u64,
    /// Events dropped because the intake queue was full.
    pub events_dropped: u64,
    pub notifications_published: u64,
    /// Per-watcher deliveries that reached a queue.
    pub deliveries: u64,
    /// Per-watcher deliveries dropped on a full queue.
    pub delivery_drops: u64,
    pub sweeps: u64,
    /// Notifications produced by the sweep rather than the immediate path.
    pub sweep_repairs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_received: AtomicU64,
    events_dropped: AtomicU64,
    notifications_published: AtomicU64,
    deliveries: AtomicU64,
    delivery_drops: AtomicU64,
    sweeps: AtomicU64,
    sweep_repairs: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> NotifierStats {
        NotifierStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            notifications_published: self.notifications_published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_drops: self.delivery_drops.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            sweep_repairs: self.sweep_repairs.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

struct TopicBuses {
    products: InMemoryEventBus<ChangeNotification>,
    warehouses: InMemoryEventBus<ChangeNotification>,
    movements: InMemoryEventBus<ChangeNotification>,
    stock_levels: InMemoryEventBus<ChangeNotification>,
}

impl TopicBuses {
    fn new(queue_capacity: usize) -> Self {
        Self {
            products: InMemoryEventBus::with_queue_capacity(queue_capacity),
            warehouses: InMemoryEventBus::with_queue_capacity(queue_capacity),
            movements: InMemoryEventBus::with_queue_capacity(queue_capacity),
            stock_levels: InMemoryEventBus::with_queue_capacity(queue_capacity),
        }
    }

    fn get(&self, topic: Topic) -> &InMemoryEventBus<ChangeNotification> {
        match topic {
            Topic::Products => &self.products,
            Topic::Warehouses => &self.warehouses,
            Topic::Movements => &self.movements,
            Topic::StockLevels => &self.stock_levels,
        }
    }
}

pub struct ChangeNotifier {
    store: Arc<dyn LedgerStore>,
    intake: mpsc::Sender<LedgerEvent>,
    buses: TopicBuses,
    movement_snapshot_limit: usize,
    counters: Counters,
}

impl ChangeNotifier {
    /// Create the notifier and its (not yet running) worker.
    pub fn new(store: Arc<dyn LedgerStore>, config: &LedgerConfig) -> (Arc<Self>, NotifierWorker) {
        let (intake, intake_rx) = mpsc::channel(config.notifier_queue_capacity.max(1));
        let notifier = Arc::new(Self {
            store,
            intake,
            buses: TopicBuses::new(config.subscriber_queue_capacity),
            movement_snapshot_limit: config.movement_snapshot_limit,
            counters: Counters::default(),
        });
        let worker = NotifierWorker::new(notifier.clone(), intake_rx, config.sweep_interval());
        (notifier, worker)
    }

    /// Register a watcher for `topic`. Dropping the subscription unregisters it.
    pub fn subscribe(&self, topic: Topic) -> Subscription<ChangeNotification> {
        let subscription = self.buses.get(topic).subscribe();
        debug!(topic = %topic, subscriber = subscription.id().0, "watcher subscribed");
        subscription
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.buses.get(topic).subscriber_count()
    }

    pub fn stats(&self) -> NotifierStats {
        self.counters.snapshot()
    }

    /// Current full state of `topic`, e.g. to render before the first notification.
    pub async fn snapshot(&self, topic: Topic) -> Result<Snapshot, LedgerError> {
        let snapshot = match topic {
            Topic::Products => Snapshot::Products(self.store.list_products().await?),
            Topic::Warehouses => {
                let warehouses = self.store.list_warehouses().await?;
                let mut out = Vec::with_capacity(warehouses.len());
                for warehouse in warehouses {
                    let total = self.store.warehouse_total(warehouse.id).await?;
                    out.push(WarehouseUtilization::new(warehouse, total));
                }
                Snapshot::Warehouses(out)
            }
            Topic::Movements => {
                let limit = (self.movement_snapshot_limit > 0).then_some(self.movement_snapshot_limit);
                Snapshot::Movements(
                    self.store
                        .query(MovementFilter {
                            limit,
                            ..MovementFilter::default()
                        })
                        .await?,
                )
            }
            Topic::StockLevels => Snapshot::StockLevels(self.store.list_levels(LevelFilter::default()).await?),
        };
        Ok(snapshot)
    }

    /// Build and publish one notification for `topic`.
    ///
    /// Returns the revision now covered for `topic`, or `None` if the store
    /// could not be read.
    async fn fan_out(&self, topic: Topic, trigger: Trigger) -> Option<u64> {
        let observed = match self.store.revision().await {
            Ok(rev) => rev,
            Err(err) => {
                warn!(topic = %topic, error = %err, "notifier could not read store revision");
                return None;
            }
        };

        let bus = self.buses.get(topic);
        if bus.subscriber_count() == 0 {
            return Some(observed);
        }

        let snapshot = match self.snapshot(topic).await {
            Ok(s) => s,
            Err(err) => {
                warn!(topic = %topic, error = %err, "notifier snapshot failed");
                return None;
            }
        };

        let notification = ChangeNotification {
            topic,
            revision: observed,
            trigger,
            snapshot,
        };

        match bus.publish(notification) {
            Ok(delivery) => {
                bump(&self.counters.notifications_published, 1);
                bump(&self.counters.deliveries, delivery.delivered as u64);
                bump(&self.counters.delivery_drops, delivery.dropped as u64);
                if delivery.dropped > 0 {
                    debug!(topic = %topic, dropped = delivery.dropped, "slow watchers skipped a notification");
                }
                Some(observed)
            }
            Err(err) => {
                warn!(topic = %topic, error = ?err, "topic bus publish failed");
                None
            }
        }
    }
}

impl ChangePublisher for ChangeNotifier {
    fn publish(&self, event: LedgerEvent) {
        bump(&self.counters.events_received, 1);
        match self.intake.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                bump(&self.counters.events_dropped, 1);
                warn!(revision = event.revision, "notifier intake full; sweep will catch up");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("notifier worker not running; event discarded");
            }
        }
    }
}
