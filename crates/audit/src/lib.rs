//! `tenantgate-audit`: audit trail of actions taken while an operator
//! impersonates another actor.
//!
//! Logs are in-memory and keyed by session id; they live only as long as
//! the impersonation window unless flushed to an [`AuditSink`].

pub mod action;
pub mod error;
pub mod sink;
pub mod tracker;

pub use action::{ActionSummary, ActionType, ImpersonationAction, ImpersonationSession};
pub use error::{AuditSinkError, TrackingFailure};
pub use sink::{AuditSink, InMemoryAuditSink};
pub use tracker::ImpersonationAuditTracker;
