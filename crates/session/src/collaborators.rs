//! Interfaces to the outside world: the auth backend, the persisted
//! key-value store and the user-facing notification sink.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tenantgate_auth::{Actor, SessionToken};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub actor: Actor,
    pub token: SessionToken,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("backend rejected the session")]
    Rejected,

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Remote authentication authority. Transport is the implementor's concern.
#[async_trait::async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome, BackendError>;

    /// May fail; local teardown never depends on it.
    async fn logout(&self) -> Result<(), BackendError>;

    async fn refresh_token(&self) -> Result<SessionToken, BackendError>;

    async fn get_current_actor(&self) -> Result<Option<Actor>, BackendError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage lock poisoned")]
    Poisoned,
}

/// Key-value persistence for session material across reloads.
pub trait PersistedKv: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct InMemoryKv {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistedKv for InMemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

/// Fire-and-forget surfacing of lifecycle events to the user.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, level: NotifyLevel, title: &str, detail: &str);
}

/// Sink that only logs. Used when the host has no UI surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, level: NotifyLevel, title: &str, detail: &str) {
        match level {
            NotifyLevel::Info => tracing::info!(title, detail, "notification"),
            NotifyLevel::Warning => tracing::warn!(title, detail, "notification"),
            NotifyLevel::Error => tracing::error!(title, detail, "notification"),
        }
    }
}
