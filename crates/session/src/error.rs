use thiserror::Error;

use tenantgate_auth::TokenValidationError;

use crate::collaborators::{BackendError, StorageError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("a session is already active")]
    AlreadyAuthenticated,

    #[error("logout in progress")]
    LogoutInProgress,

    #[error("session expired")]
    SessionExpired,

    #[error("token refresh failed: {0}")]
    RefreshFailure(String),

    #[error("session terminated")]
    Terminated,

    #[error("backend issued an unusable token: {0}")]
    InvalidToken(#[from] TokenValidationError),

    #[error("only operators may impersonate")]
    ImpersonationDenied,

    #[error("an impersonation window is already open")]
    ImpersonationActive,

    #[error("monitoring requires a running tokio runtime")]
    NoRuntime,

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
