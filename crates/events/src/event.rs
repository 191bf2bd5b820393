use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A domain-agnostic event.
///
/// Events are immutable facts, versioned for schema evolution.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "listing.published").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Identifier of the record the event is about.
    fn subject_id(&self) -> Uuid;
}
