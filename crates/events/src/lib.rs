//! Event mechanics: the `Event` trait and a bounded pub/sub bus.
//!
//! Nothing here knows about stock; the inventory crate defines the events and
//! the infra crate decides who publishes them.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{Delivery, EventBus, SubscriberId, Subscription, Unsubscribe};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
