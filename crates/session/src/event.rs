use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tenantgate_core::{ActorId, SessionId};
use tenantgate_events::Event;

use crate::machine::ExpiryCause;

/// Lifecycle facts published by the session controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    LoggedIn {
        session_id: SessionId,
        actor_id: ActorId,
        at: DateTime<Utc>,
    },
    Restored {
        session_id: SessionId,
        actor_id: ActorId,
        at: DateTime<Utc>,
    },
    IdleWarning {
        session_id: SessionId,
        remaining: Duration,
        at: DateTime<Utc>,
    },
    ActivityResumed {
        session_id: SessionId,
        at: DateTime<Utc>,
    },
    Extended {
        session_id: SessionId,
        at: DateTime<Utc>,
    },
    TokenRefreshed {
        session_id: SessionId,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    Expired {
        session_id: SessionId,
        cause: ExpiryCause,
        at: DateTime<Utc>,
    },
    LoggedOut {
        session_id: Option<SessionId>,
        at: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            SessionEvent::LoggedIn { session_id, .. }
            | SessionEvent::Restored { session_id, .. }
            | SessionEvent::IdleWarning { session_id, .. }
            | SessionEvent::ActivityResumed { session_id, .. }
            | SessionEvent::Extended { session_id, .. }
            | SessionEvent::TokenRefreshed { session_id, .. }
            | SessionEvent::Expired { session_id, .. } => Some(*session_id),
            SessionEvent::LoggedOut { session_id, .. } => *session_id,
        }
    }
}

impl Event for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::LoggedIn { .. } => "session.logged_in",
            SessionEvent::Restored { .. } => "session.restored",
            SessionEvent::IdleWarning { .. } => "session.idle_warning",
            SessionEvent::ActivityResumed { .. } => "session.activity_resumed",
            SessionEvent::Extended { .. } => "session.extended",
            SessionEvent::TokenRefreshed { .. } => "session.token_refreshed",
            SessionEvent::Expired { .. } => "session.expired",
            SessionEvent::LoggedOut { .. } => "session.logged_out",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::LoggedIn { at, .. }
            | SessionEvent::Restored { at, .. }
            | SessionEvent::IdleWarning { at, .. }
            | SessionEvent::ActivityResumed { at, .. }
            | SessionEvent::Extended { at, .. }
            | SessionEvent::TokenRefreshed { at, .. }
            | SessionEvent::Expired { at, .. }
            | SessionEvent::LoggedOut { at, .. } => *at,
        }
    }
}
