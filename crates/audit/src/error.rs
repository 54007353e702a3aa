use thiserror::Error;

/// Why an action could not be recorded. Logged by the tracker, never
/// returned from `track_*`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackingFailure {
    #[error("audit log lock poisoned")]
    Poisoned,

    #[error("resource name is empty")]
    EmptyResource,

    #[error("audit sink rejected actions: {0}")]
    Sink(#[from] AuditSinkError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct AuditSinkError(pub String);
