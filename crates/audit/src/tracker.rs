//! Session-scoped impersonation action log.
//!
//! Recording is best-effort: `track_*` never returns an error and never
//! panics into the caller. The action being observed must not fail because
//! its audit record could not be written.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Value, json};

use tenantgate_core::{Clock, SessionId};

use crate::action::{ActionSummary, ActionType, ImpersonationAction, ImpersonationSession};
use crate::error::TrackingFailure;
use crate::sink::AuditSink;

#[derive(Debug, Default)]
struct TrackerState {
    logs: HashMap<SessionId, Vec<ImpersonationAction>>,
    sessions: HashMap<SessionId, ImpersonationSession>,
    /// Closed windows whose log the sink has not accepted yet.
    unflushed: HashMap<SessionId, ImpersonationSession>,
}

pub struct ImpersonationAuditTracker {
    clock: Arc<dyn Clock>,
    state: RwLock<TrackerState>,
}

impl core::fmt::Debug for ImpersonationAuditTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (logs, sessions) = self
            .state
            .read()
            .map(|s| (s.logs.len(), s.sessions.len()))
            .unwrap_or_default();
        f.debug_struct("ImpersonationAuditTracker")
            .field("logs", &logs)
            .field("sessions", &sessions)
            .finish()
    }
}

impl ImpersonationAuditTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RwLock::new(TrackerState::default()),
        }
    }

    // ---------------------------------------------------------------------
    // Window lifecycle
    // ---------------------------------------------------------------------

    /// Record the start of an impersonation window. Never discards actions:
    /// a log already held under the same id stays until it is flushed or
    /// cleared explicitly.
    pub fn begin_session(&self, session: ImpersonationSession) {
        match self.state.write() {
            Ok(mut state) => {
                let session_id = session.session_id;
                if state.logs.get(&session_id).is_some_and(|log| !log.is_empty()) {
                    tracing::warn!(session_id = %session_id, "audit window reopened over an unflushed log");
                }
                state.unflushed.remove(&session_id);
                state.sessions.insert(session_id, session);
            }
            Err(_) => tracing::error!(error = %TrackingFailure::Poisoned, "failed to begin audit session"),
        }
    }

    pub fn session(&self, session_id: SessionId) -> Option<ImpersonationSession> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.sessions.get(&session_id).cloned())
    }

    pub fn active_sessions(&self) -> Vec<ImpersonationSession> {
        self.state
            .read()
            .map(|s| s.sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Close the window: flush to `sink` when given, then drop the log and
    /// the window record. Returns the final summary.
    ///
    /// If the sink rejects the batch the window is still closed, but the log
    /// and the window record are kept aside so a later
    /// [`Self::flush_session`] can retry with full attribution.
    pub fn end_session(&self, session_id: SessionId, sink: Option<&dyn AuditSink>) -> ActionSummary {
        let summary = self.get_action_summary(session_id);

        let flushed = match sink {
            Some(sink) => match self.flush_session(session_id, sink) {
                Ok(_) => true,
                Err(error) => {
                    tracing::error!(session_id = %session_id, %error, "audit flush failed; log retained");
                    false
                }
            },
            None => true,
        };

        match self.state.write() {
            Ok(mut state) => {
                let window = state.sessions.remove(&session_id);
                if flushed {
                    state.logs.remove(&session_id);
                } else if let Some(window) = window {
                    state.unflushed.insert(session_id, window);
                }
            }
            Err(_) => tracing::error!(error = %TrackingFailure::Poisoned, "failed to end audit session"),
        }

        tracing::info!(session_id = %session_id, actions = summary.total, "impersonation audit closed");
        summary
    }

    /// Hand the session's actions to `sink`; the log is cleared only after
    /// the sink accepts them. Returns the number of actions flushed.
    pub fn flush_session(
        &self,
        session_id: SessionId,
        sink: &dyn AuditSink,
    ) -> Result<usize, TrackingFailure> {
        let (session, actions) = {
            let state = self.state.read().map_err(|_| TrackingFailure::Poisoned)?;
            (
                state
                    .sessions
                    .get(&session_id)
                    .or_else(|| state.unflushed.get(&session_id))
                    .cloned(),
                state.logs.get(&session_id).cloned().unwrap_or_default(),
            )
        };
        if actions.is_empty() {
            return Ok(0);
        }

        sink.record(session.as_ref(), &actions)?;

        let mut state = self.state.write().map_err(|_| TrackingFailure::Poisoned)?;
        if let Some(log) = state.logs.get_mut(&session_id) {
            // actions recorded while the sink was writing stay in the log
            let flushed = actions.len().min(log.len());
            log.drain(..flushed);
            if log.is_empty() {
                state.logs.remove(&session_id);
                state.unflushed.remove(&session_id);
            }
        }
        Ok(actions.len())
    }

    /// Closed windows still holding actions the sink rejected.
    pub fn unflushed_sessions(&self) -> Vec<ImpersonationSession> {
        self.state
            .read()
            .map(|s| s.unflushed.values().cloned().collect())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Recording
    // ---------------------------------------------------------------------

    pub fn track(
        &self,
        session_id: Option<SessionId>,
        action_type: ActionType,
        resource: &str,
        resource_id: Option<&str>,
        metadata: Option<Value>,
    ) {
        let Some(session_id) = session_id else {
            tracing::warn!(%action_type, resource, "audit tracking called without an active session");
            return;
        };
        if let Err(error) = self.append(session_id, action_type, resource, resource_id, metadata) {
            tracing::error!(session_id = %session_id, %action_type, resource, %error, "failed to track impersonation action");
        }
    }

    fn append(
        &self,
        session_id: SessionId,
        action_type: ActionType,
        resource: &str,
        resource_id: Option<&str>,
        metadata: Option<Value>,
    ) -> Result<(), TrackingFailure> {
        if resource.trim().is_empty() {
            return Err(TrackingFailure::EmptyResource);
        }
        let action = ImpersonationAction {
            session_id,
            action_type,
            resource: resource.to_string(),
            resource_id: resource_id.map(str::to_string),
            metadata,
            timestamp: self.clock.now(),
        };
        let mut state = self.state.write().map_err(|_| TrackingFailure::Poisoned)?;
        state.logs.entry(session_id).or_default().push(action);
        tracing::debug!(session_id = %session_id, %action_type, resource, "impersonation action tracked");
        Ok(())
    }

    pub fn track_page_view(&self, session_id: Option<SessionId>, page: &str) {
        self.track(session_id, ActionType::PageView, page, None, None);
    }

    pub fn track_api_call(
        &self,
        session_id: Option<SessionId>,
        method: &str,
        endpoint: &str,
        status: Option<u16>,
    ) {
        let metadata = json!({ "method": method, "status": status });
        self.track(session_id, ActionType::ApiCall, endpoint, None, Some(metadata));
    }

    pub fn track_create(&self, session_id: Option<SessionId>, resource: &str, resource_id: &str) {
        self.track(session_id, ActionType::Create, resource, Some(resource_id), None);
    }

    /// `changes` is whatever diff the caller has; stored verbatim.
    pub fn track_update(
        &self,
        session_id: Option<SessionId>,
        resource: &str,
        resource_id: &str,
        changes: Option<Value>,
    ) {
        let metadata = changes.map(|changes| json!({ "changes": changes }));
        self.track(session_id, ActionType::Update, resource, Some(resource_id), metadata);
    }

    pub fn track_delete(&self, session_id: Option<SessionId>, resource: &str, resource_id: &str) {
        self.track(session_id, ActionType::Delete, resource, Some(resource_id), None);
    }

    pub fn track_export(
        &self,
        session_id: Option<SessionId>,
        resource: &str,
        format: &str,
        record_count: usize,
    ) {
        let metadata = json!({ "format": format, "record_count": record_count });
        self.track(session_id, ActionType::Export, resource, None, Some(metadata));
    }

    pub fn track_search(&self, session_id: Option<SessionId>, resource: &str, query: &str) {
        let metadata = json!({ "query": query });
        self.track(session_id, ActionType::Search, resource, None, Some(metadata));
    }

    pub fn track_print(&self, session_id: Option<SessionId>, resource: &str, resource_id: Option<&str>) {
        self.track(session_id, ActionType::Print, resource, resource_id, None);
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Chronological.
    pub fn get_session_actions(&self, session_id: SessionId) -> Vec<ImpersonationAction> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.logs.get(&session_id).cloned())
            .unwrap_or_default()
    }

    pub fn get_action_count(&self, session_id: SessionId) -> usize {
        self.state
            .read()
            .ok()
            .and_then(|s| s.logs.get(&session_id).map(Vec::len))
            .unwrap_or(0)
    }

    pub fn get_action_summary(&self, session_id: SessionId) -> ActionSummary {
        match self.state.read() {
            Ok(state) => ActionSummary::from_actions(
                session_id,
                state.logs.get(&session_id).map(Vec::as_slice).unwrap_or(&[]),
            ),
            Err(_) => ActionSummary::from_actions(session_id, &[]),
        }
    }

    /// Drop one session's log. Other sessions are untouched.
    pub fn clear_session_actions(&self, session_id: SessionId) {
        match self.state.write() {
            Ok(mut state) => {
                state.logs.remove(&session_id);
                state.unflushed.remove(&session_id);
            }
            Err(_) => tracing::error!(error = %TrackingFailure::Poisoned, "failed to clear audit log"),
        }
    }

    /// Drop every log and window. Used on logout.
    pub fn clear_all(&self) {
        match self.state.write() {
            Ok(mut state) => {
                state.logs.clear();
                state.sessions.clear();
                state.unflushed.clear();
            }
            Err(_) => tracing::error!(error = %TrackingFailure::Poisoned, "failed to clear audit logs"),
        }
    }
}
