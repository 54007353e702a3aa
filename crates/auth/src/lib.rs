//! `tenantgate-auth`: actors, tokens and the access-control engine.
//!
//! This crate is intentionally decoupled from transport and storage: the
//! permission authority is a pluggable [`PermissionPredicate`].

pub mod actor;
pub mod decision;
pub mod engine;
pub mod predicate;
pub mod roles;
pub mod token;

pub use actor::{Actor, ActorRecord, ActorScope};
pub use decision::{AccessDecision, ReasonCode};
pub use engine::{AccessControlEngine, AccessExplanation, ActorState};
pub use predicate::{GrantSetPredicate, PermissionConvention, PermissionPredicate, PredicateError};
pub use roles::Role;
pub use tenantgate_core::Permission;
pub use token::{SessionToken, TokenValidationError, validate_token};
