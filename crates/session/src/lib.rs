//! `tenantgate-session`: the session lifecycle, covering authentication state, idle
//! detection, expiry warnings, token refresh and ordered logout.
//!
//! The [`SessionMachine`] is the single source of truth for session state;
//! the [`SessionLifecycleController`] wires it to timers, collaborators and
//! the lifecycle event bus.

pub mod collaborators;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod machine;

pub use collaborators::{
    AuthBackend, BackendError, Credentials, InMemoryKv, LoginOutcome, NotificationSink,
    NotifyLevel, PersistedKv, StorageError, TracingNotificationSink,
};
pub use config::SessionConfig;
pub use controller::{ImpersonationContext, MonitorHooks, SessionLifecycleController};
pub use error::SessionError;
pub use event::SessionEvent;
pub use machine::{
    ExpiryCause, IdlePolicy, Session, SessionInfo, SessionInput, SessionMachine, SessionState,
    Transition,
};
