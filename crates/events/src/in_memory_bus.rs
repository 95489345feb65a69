//! In-memory event bus with bounded per-subscriber queues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, Weak};

use crate::bus::{Delivery, EventBus, SubscriberId, Subscription, Unsubscribe};

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("subscriber registry lock poisoned")]
    Poisoned,
}

struct Slot<M> {
    id: SubscriberId,
    tx: SyncSender<M>,
}

struct Registry<M> {
    slots: Mutex<Vec<Slot<M>>>,
    next_id: AtomicU64,
    dropped_total: AtomicU64,
}

impl<M: Send> Unsubscribe for Registry<M> {
    fn unsubscribe(&self, id: SubscriberId) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.retain(|slot| slot.id != id);
        }
    }
}

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Best-effort fan-out; a full queue drops the message for that subscriber
/// - At-least-once acceptable (subscribers must be idempotent)
pub struct InMemoryEventBus<M> {
    registry: Arc<Registry<M>>,
    queue_capacity: usize,
}

impl<M> InMemoryEventBus<M> {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

    pub fn new() -> Self {
        Self::with_queue_capacity(Self::DEFAULT_QUEUE_CAPACITY)
    }

    /// Every subscriber gets a queue holding at most `capacity` messages (min 1).
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                slots: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                dropped_total: AtomicU64::new(0),
            }),
            queue_capacity: capacity.max(1),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Messages dropped on full queues since the bus was created.
    pub fn dropped_total(&self) -> u64 {
        self.registry.dropped_total.load(Ordering::Relaxed)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> core::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("queue_capacity", &self.queue_capacity)
            .field("dropped_total", &self.dropped_total())
            .finish()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<Delivery, Self::Error> {
        let mut slots = self
            .registry
            .slots
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?;

        let mut delivery = Delivery::default();
        slots.retain(|slot| match slot.tx.try_send(message.clone()) {
            Ok(()) => {
                delivery.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                delivery.dropped += 1;
                true
            }
            // Receiver gone without unsubscribing.
            Err(TrySendError::Disconnected(_)) => false,
        });

        if delivery.dropped > 0 {
            self.registry
                .dropped_total
                .fetch_add(delivery.dropped as u64, Ordering::Relaxed);
            tracing::debug!(dropped = delivery.dropped, "subscriber queue full, message dropped");
        }

        Ok(delivery)
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::sync_channel(self.queue_capacity);
        let id = SubscriberId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut slots) = self.registry.slots.lock() {
            slots.push(Slot { id, tx });
        }

        let registry: Arc<dyn Unsubscribe> = self.registry.clone();
        let weak: Weak<dyn Unsubscribe> = Arc::downgrade(&registry);
        Subscription::registered(id, rx, weak)
    }

    fn subscriber_count(&self) -> usize {
        self.registry.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }
}
