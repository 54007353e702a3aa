use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque session token as issued by the auth backend.
///
/// The token format is not interpreted here; only its validity window is.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn new(value: impl Into<String>, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            issued_at,
            expires_at,
        }
    }

    /// Time left before hard expiry (zero once expired).
    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.expires_at - now).max(chrono::Duration::zero())
    }
}

// Token material never reaches logs.
impl core::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionToken")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("token value is empty")]
    Empty,
}

/// Deterministically validate a token's time window.
///
/// Signature verification / decoding is the backend's concern.
pub fn validate_token(token: &SessionToken, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if token.value.trim().is_empty() {
        return Err(TokenValidationError::Empty);
    }
    if token.expires_at <= token.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < token.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= token.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}
