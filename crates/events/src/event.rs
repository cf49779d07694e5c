use chrono::{DateTime, Utc};

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **self-describing** (stable type discriminator used for routing)
/// - either **in-process only** or **integration** (crossing a service boundary)
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "sales.order.placed").
    fn event_type(&self) -> &'static str;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Whether this event is meant to cross a service/process boundary.
    ///
    /// Integration events get a durable outbox row before in-process delivery;
    /// plain domain events are delivered in-process only. Defaults to `false`.
    fn is_integration(&self) -> bool {
        false
    }
}
