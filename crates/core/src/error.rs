//! Errors shared by the pure layers.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic failures: bad configuration values, unparseable ids,
/// conflicting requests and refused authority. Collaborator failures (backend,
/// storage, audit sink) are typed in the crates that talk to them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Rejected input, such as an idle policy whose warning lead does not
    /// fit inside the timeout.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The request contradicts current state, e.g. opening a second
    /// impersonation window.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_the_detail() {
        assert_eq!(
            DomainError::conflict("window open").to_string(),
            "conflict: window open"
        );
        assert_eq!(DomainError::Unauthorized.to_string(), "unauthorized");
    }
}
