use chrono::{DateTime, Utc};

/// A published fact. Never mutated after it is created; the bus clones it once
/// per subscriber.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name such as `stock.received`, used in logs and by consumers
    /// that filter raw events.
    fn event_type(&self) -> &'static str;

    /// Business time of the change the event describes.
    fn occurred_at(&self) -> DateTime<Utc>;
}
