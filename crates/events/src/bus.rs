//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is a **registry of bounded subscriber queues**:
//!
//! - **Non-blocking publish**: a full subscriber queue drops the message for that
//!   subscriber instead of stalling the publisher.
//! - **At-least-once at the system level**: a dropped message is expected to be
//!   repaired by a later publish (e.g. a reconciliation sweep), so consumers must
//!   tolerate duplicates and gaps.
//! - **Explicit cleanup**: dropping a [`Subscription`] removes it from the
//!   registry; disconnected queues are also pruned on the next publish.
//!
//! ```ignore
//! let subscription = bus.subscribe();
//!
//! loop {
//!     match subscription.recv_timeout(Duration::from_secs(1)) {
//!         Ok(message) => render(message),
//!         Err(RecvTimeoutError::Timeout) => continue,  // check for shutdown
//!         Err(RecvTimeoutError::Disconnected) => break, // bus dropped
//!     }
//! }
//! ```

use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Registry-assigned identity of one subscriber.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

/// Implemented by registries that can forget a subscriber.
pub trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: SubscriberId);
}

/// Outcome of one publish across all subscribers.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribers whose queue accepted the message.
    pub delivered: usize,
    /// Subscribers whose queue was full; the message was dropped for them.
    pub dropped: usize,
}

/// A subscription to an event stream.
///
/// Each subscription gets a copy of every message published while it is
/// registered (broadcast semantics), subject to its own queue bound.
///
/// Subscriptions are designed for single-threaded consumption.
pub struct Subscription<M> {
    id: SubscriberId,
    receiver: Receiver<M>,
    registry: Option<Weak<dyn Unsubscribe>>,
}

impl<M> Subscription<M> {
    /// A subscription that is not tracked by any registry.
    pub fn detached(id: SubscriberId, receiver: Receiver<M>) -> Self {
        Self {
            id,
            receiver,
            registry: None,
        }
    }

    /// A subscription that removes itself from `registry` when dropped.
    pub fn registered(id: SubscriberId, receiver: Receiver<M>, registry: Weak<dyn Unsubscribe>) -> Self {
        Self {
            id,
            receiver,
            registry: Some(registry),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

impl<M> core::fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("registered", &self.registry.is_some())
            .finish()
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            registry.unsubscribe(self.id);
        }
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ```text
/// Ledger commit → publish(event) → bounded queue per subscriber → watcher
/// ```
///
/// `publish()` must never block on a slow subscriber. It fails only when the
/// bus itself is unusable (e.g. a poisoned registry lock).
///
/// The trait requires `Send + Sync`; multiple threads can publish concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<Delivery, Self::Error>;

    fn subscribe(&self) -> Subscription<M>;

    /// Number of currently registered subscribers.
    fn subscriber_count(&self) -> usize;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<Delivery, Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }

    fn subscriber_count(&self) -> usize {
        (**self).subscriber_count()
    }
}
