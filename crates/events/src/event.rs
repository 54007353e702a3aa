use chrono::{DateTime, Utc};

/// A lifecycle event.
///
/// Events are facts about something that already happened (a warning was
/// raised, a session expired). They are never commands.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "session.idle_warning").
    fn event_type(&self) -> &'static str;

    /// When the event occurred, as read from the emitter's clock.
    fn occurred_at(&self) -> DateTime<Utc>;
}
