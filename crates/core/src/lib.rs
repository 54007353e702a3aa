//! `tenantgate-core`: shared building blocks for the session and access-control engine.
//!
//! This crate contains **pure** primitives (identifiers, errors, time source).
//! No IO, no policy.

pub mod clock;
pub mod error;
pub mod id;
pub mod permission;

pub use clock::{Clock, FixedClock, SystemClock, TokioClock};
pub use error::{DomainError, DomainResult};
pub use id::{ActorId, SessionId, TenantId};
pub use permission::Permission;
