//! Application shell: explicit composition of the four components.
//!
//! One `AppShell` per client. Nothing here is global; tests build a fresh
//! shell each.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;

use tenantgate_audit::{
    ActionSummary, ActionType, AuditSink, ImpersonationAuditTracker, ImpersonationSession,
};
use tenantgate_auth::{
    AccessControlEngine, AccessDecision, AccessExplanation, Actor, GrantSetPredicate,
    PermissionPredicate,
};
use tenantgate_core::{ActorId, Clock, DomainError, TenantId, TokioClock};
use tenantgate_events::{EventEnvelope, Subscription};
use tenantgate_modules::{InitSummary, ModuleRegistry};
use tenantgate_session::{
    AuthBackend, Credentials, InMemoryKv, MonitorHooks, NotificationSink, PersistedKv,
    SessionError, SessionEvent, SessionInfo, SessionLifecycleController, TracingNotificationSink,
};

use crate::config::ShellConfig;

pub struct AppShellBuilder {
    config: ShellConfig,
    registry: Arc<ModuleRegistry>,
    backend: Arc<dyn AuthBackend>,
    predicate: Arc<dyn PermissionPredicate>,
    storage: Arc<dyn PersistedKv>,
    notifier: Arc<dyn NotificationSink>,
    clock: Option<Arc<dyn Clock>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    decision_cache: bool,
}

impl AppShellBuilder {
    /// Defaults to [`GrantSetPredicate`] and in-memory session storage.
    pub fn new(config: ShellConfig, registry: Arc<ModuleRegistry>, backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            config,
            registry,
            backend,
            predicate: Arc::new(GrantSetPredicate),
            storage: Arc::new(InMemoryKv::new()),
            notifier: Arc::new(TracingNotificationSink),
            clock: None,
            audit_sink: None,
            decision_cache: false,
        }
    }

    pub fn predicate(mut self, predicate: Arc<dyn PermissionPredicate>) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn PersistedKv>) -> Self {
        self.storage = storage;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Where impersonation logs go when a window closes.
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn with_decision_cache(mut self) -> Self {
        self.decision_cache = true;
        self
    }

    pub fn build(self) -> anyhow::Result<AppShell> {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(TokioClock::new()) as Arc<dyn Clock>);

        let mut engine = AccessControlEngine::new(self.registry.clone(), self.predicate)
            .with_convention(self.config.permission_convention)
            .with_clock(clock.clone());
        if self.decision_cache {
            engine = engine.with_decision_cache();
        }
        let engine = Arc::new(engine);

        let session = SessionLifecycleController::new(
            self.config.session_config(),
            self.backend,
            self.storage,
            self.notifier,
            clock.clone(),
        )
        .context("invalid session configuration")?;

        let audit = Arc::new(ImpersonationAuditTracker::new(clock));

        // Session end (logout or expiry): close any audit window, drop
        // memoized decisions.
        {
            let engine = engine.clone();
            let audit = audit.clone();
            let sink = self.audit_sink.clone();
            session.register_teardown_hook(move || {
                for window in audit.active_sessions() {
                    audit.end_session(window.session_id, sink.as_deref());
                }
                engine.invalidate_all();
            });
        }

        tracing::info!(
            modules = self.registry.registered_names().len(),
            convention = ?self.config.permission_convention,
            "app shell assembled"
        );

        Ok(AppShell {
            config: self.config,
            registry: self.registry,
            engine,
            session,
            audit,
            audit_sink: self.audit_sink,
        })
    }
}

pub struct AppShell {
    config: ShellConfig,
    registry: Arc<ModuleRegistry>,
    engine: Arc<AccessControlEngine>,
    session: SessionLifecycleController,
    audit: Arc<ImpersonationAuditTracker>,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl core::fmt::Debug for AppShell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppShell")
            .field("registry", &self.registry)
            .field("session", &self.session)
            .field("audit", &self.audit)
            .finish()
    }
}

impl AppShell {
    pub fn builder(
        config: ShellConfig,
        registry: Arc<ModuleRegistry>,
        backend: Arc<dyn AuthBackend>,
    ) -> AppShellBuilder {
        AppShellBuilder::new(config, registry, backend)
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<AccessControlEngine> {
        &self.engine
    }

    pub fn session(&self) -> &SessionLifecycleController {
        &self.session
    }

    pub fn audit(&self) -> &Arc<ImpersonationAuditTracker> {
        &self.audit
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Initialize every registered module, restore any persisted session and
    /// start monitoring. Returns the module init summary.
    pub async fn init(&self, hooks: MonitorHooks) -> Result<InitSummary, SessionError> {
        let summary = self.registry.initialize_all();
        if !summary.is_complete() {
            tracing::warn!(failed = summary.failed.len(), "some modules failed to initialize");
        }

        if self.session.restore().await {
            self.engine.invalidate_all();
        }
        self.session.start_monitoring(hooks)?;
        Ok(summary)
    }

    /// Stop background work. The session itself is left as is.
    pub fn teardown(&self) {
        self.session.stop_monitoring();
    }

    // ---------------------------------------------------------------------
    // Session surface
    // ---------------------------------------------------------------------

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn current_actor(&self) -> Option<Actor> {
        self.session.current_actor()
    }

    pub fn get_session_info(&self) -> SessionInfo {
        self.session.get_session_info()
    }

    pub fn subscribe(&self) -> Subscription<EventEnvelope<SessionEvent>> {
        self.session.subscribe()
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<Actor, SessionError> {
        let actor = self.session.login(credentials).await?;
        self.engine.invalidate_all();
        Ok(actor)
    }

    pub async fn logout(&self) {
        self.session.logout().await;
    }

    pub fn record_activity(&self) {
        self.session.record_activity();
    }

    // ---------------------------------------------------------------------
    // Access surface
    // ---------------------------------------------------------------------

    pub fn access_decision(&self, module: &str) -> AccessDecision {
        let actor = self.session.current_actor();
        let decision = self.engine.can_access(actor.as_ref(), module);
        if !decision.allowed {
            tracing::debug!(module, reason = %decision.reason, "module access denied");
        }
        decision
    }

    pub fn can_access_module(&self, module: &str) -> bool {
        self.access_decision(module).allowed
    }

    pub fn explain_access(&self, module: &str) -> AccessExplanation {
        let actor = self.session.current_actor();
        self.engine.explain(actor.as_ref(), module)
    }

    /// Names of every module the current actor may reach, in registration
    /// order.
    pub fn list_accessible_modules(&self) -> Vec<String> {
        let actor = self.session.current_actor();
        self.engine
            .list_accessible_modules(actor.as_ref())
            .into_iter()
            .map(|d| d.name.as_str().to_string())
            .collect()
    }

    // ---------------------------------------------------------------------
    // Impersonation
    // ---------------------------------------------------------------------

    /// Open an audited impersonation window. Only an authenticated operator
    /// may impersonate.
    pub fn start_impersonation(
        &self,
        target_actor_id: ActorId,
        tenant_id: Option<TenantId>,
    ) -> Result<ImpersonationSession, DomainError> {
        let context = self
            .session
            .begin_impersonation(target_actor_id, tenant_id)
            .map_err(|error| match error {
                SessionError::ImpersonationActive => {
                    DomainError::conflict("an impersonation window is already open")
                }
                _ => DomainError::Unauthorized,
            })?;

        let window = ImpersonationSession {
            session_id: context.window_id,
            operator_actor_id: context.operator_actor_id,
            target_actor_id: context.target_actor_id,
            tenant_id: context.tenant_id,
            started_at: context.started_at,
        };
        self.audit.begin_session(window.clone());
        self.engine.invalidate_all();
        Ok(window)
    }

    /// Close the window, flush its log to the audit sink (if any) and return
    /// the final summary. `None` when no window was open.
    pub fn end_impersonation(&self) -> Option<ActionSummary> {
        let context = self.session.end_impersonation()?;
        let summary = self
            .audit
            .end_session(context.window_id, self.audit_sink.as_deref());
        self.engine.invalidate_all();
        Some(summary)
    }

    pub fn impersonation(&self) -> Option<ImpersonationSession> {
        let context = self.session.impersonation()?;
        self.audit.session(context.window_id)
    }

    /// Record an action against the open impersonation window. Outside a
    /// window this only logs a warning.
    pub fn track_action(
        &self,
        action_type: ActionType,
        resource: &str,
        resource_id: Option<&str>,
        metadata: Option<Value>,
    ) {
        let window_id = self.session.impersonation().map(|c| c.window_id);
        self.audit
            .track(window_id, action_type, resource, resource_id, metadata);
    }
}
