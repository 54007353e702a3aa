use std::sync::Mutex;

use crate::action::{ImpersonationAction, ImpersonationSession};
use crate::error::AuditSinkError;

/// Durable destination for flushed impersonation logs.
pub trait AuditSink: Send + Sync {
    fn record(
        &self,
        session: Option<&ImpersonationSession>,
        actions: &[ImpersonationAction],
    ) -> Result<(), AuditSinkError>;
}

/// Keeps every flushed batch in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    batches: Mutex<Vec<(Option<ImpersonationSession>, Vec<ImpersonationAction>)>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<(Option<ImpersonationSession>, Vec<ImpersonationAction>)> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn total_actions(&self) -> usize {
        self.batches
            .lock()
            .map(|b| b.iter().map(|(_, a)| a.len()).sum())
            .unwrap_or(0)
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(
        &self,
        session: Option<&ImpersonationSession>,
        actions: &[ImpersonationAction],
    ) -> Result<(), AuditSinkError> {
        let mut batches = self
            .batches
            .lock()
            .map_err(|_| AuditSinkError("sink lock poisoned".into()))?;
        batches.push((session.cloned(), actions.to_vec()));
        Ok(())
    }
}
