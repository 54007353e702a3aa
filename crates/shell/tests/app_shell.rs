use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;

use tenantgate_audit::{
    ActionType, AuditSink, AuditSinkError, ImpersonationAction, ImpersonationSession,
    InMemoryAuditSink,
};
use tenantgate_auth::{Actor, Permission, SessionToken};
use tenantgate_core::{ActorId, Clock, DomainError, TenantId, TokioClock};
use tenantgate_modules::{ModuleDescriptor, ModuleRegistry, RegistryError};
use tenantgate_session::{
    AuthBackend, BackendError, Credentials, InMemoryKv, LoginOutcome, MonitorHooks, SessionState,
};
use tenantgate_shell::{AppShell, ShellConfig};

struct DirectoryBackend {
    clock: TokioClock,
    actor: Mutex<Actor>,
    logouts: AtomicUsize,
}

impl DirectoryBackend {
    fn new(clock: TokioClock, actor: Actor) -> Self {
        Self {
            clock,
            actor: Mutex::new(actor),
            logouts: AtomicUsize::new(0),
        }
    }

    fn current(&self) -> Actor {
        self.actor.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AuthBackend for DirectoryBackend {
    async fn login(&self, _: &Credentials) -> Result<LoginOutcome, BackendError> {
        let now = self.clock.now();
        Ok(LoginOutcome {
            actor: self.current(),
            token: SessionToken::new("opaque", now, now + chrono::Duration::hours(8)),
        })
    }

    async fn logout(&self) -> Result<(), BackendError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn refresh_token(&self) -> Result<SessionToken, BackendError> {
        let now = self.clock.now();
        Ok(SessionToken::new("opaque-2", now, now + chrono::Duration::hours(8)))
    }

    async fn get_current_actor(&self) -> Result<Option<Actor>, BackendError> {
        Ok(Some(self.current()))
    }
}

fn registry() -> Arc<ModuleRegistry> {
    Arc::new(
        ModuleRegistry::from_descriptors(vec![
            ModuleDescriptor::operator_only("tenants"),
            ModuleDescriptor::operator_only("platform_billing").with_dependency("tenants"),
            ModuleDescriptor::tenant_scoped("customers", Some(Permission::new("customers:view"))),
            ModuleDescriptor::tenant_scoped("tickets", Some(Permission::new("tickets:view")))
                .with_dependency("customers"),
            ModuleDescriptor::tenant_scoped("reports", None),
        ])
        .unwrap(),
    )
}

fn operator() -> Actor {
    Actor::operator(ActorId::new(), "platform_admin")
}

fn clerk() -> Actor {
    Actor::tenant(ActorId::new(), TenantId::new(), "clerk")
        .with_permissions(["customers:view", "tickets:view"])
}

struct Fixture {
    shell: AppShell,
    backend: Arc<DirectoryBackend>,
    sink: Arc<InMemoryAuditSink>,
}

fn fixture(actor: Actor) -> Fixture {
    fixture_with(actor, registry(), Arc::new(InMemoryKv::new()))
}

fn fixture_with(actor: Actor, registry: Arc<ModuleRegistry>, kv: Arc<InMemoryKv>) -> Fixture {
    let clock = TokioClock::anchored_at(Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap());
    let backend = Arc::new(DirectoryBackend::new(clock, actor));
    let sink = Arc::new(InMemoryAuditSink::new());
    let shell = AppShell::builder(ShellConfig::default(), registry, backend.clone())
        .storage(kv)
        .clock(Arc::new(clock))
        .audit_sink(sink.clone())
        .with_decision_cache()
        .build()
        .unwrap();
    Fixture {
        shell,
        backend,
        sink,
    }
}

struct OfflineAuditSink;

impl AuditSink for OfflineAuditSink {
    fn record(
        &self,
        _: Option<&ImpersonationSession>,
        _: &[ImpersonationAction],
    ) -> Result<(), AuditSinkError> {
        Err(AuditSinkError("audit store offline".into()))
    }
}

fn creds() -> Credentials {
    Credentials::new("someone", "secret")
}

#[tokio::test(start_paused = true)]
async fn unauthenticated_shell_reaches_nothing() {
    let f = fixture(clerk());
    assert!(!f.shell.is_authenticated());
    assert!(f.shell.current_actor().is_none());
    assert!(f.shell.list_accessible_modules().is_empty());
    assert!(!f.shell.can_access_module("customers"));
    assert!(!f.shell.can_access_module("tenants"));
}

#[tokio::test(start_paused = true)]
async fn operator_and_tenant_see_disjoint_modules() {
    let op = fixture(operator());
    op.shell.login(&creds()).await.unwrap();
    let operator_modules = op.shell.list_accessible_modules();
    assert_eq!(operator_modules, vec!["tenants", "platform_billing"]);
    assert!(!op.shell.can_access_module("customers"));

    let tenant = fixture(clerk());
    tenant.shell.login(&creds()).await.unwrap();
    let tenant_modules = tenant.shell.list_accessible_modules();
    assert_eq!(tenant_modules, vec!["customers", "tickets"]);
    assert!(!tenant.shell.can_access_module("tenants"));
    // declared without a permission key
    assert!(!tenant.shell.can_access_module("reports"));

    assert!(
        operator_modules
            .iter()
            .all(|m| !tenant_modules.contains(m))
    );
}

#[tokio::test(start_paused = true)]
async fn explanation_names_the_permission_consulted() {
    let f = fixture(clerk());
    f.shell.login(&creds()).await.unwrap();

    let explanation = f.shell.explain_access("tickets");
    assert!(explanation.decision.allowed);
    assert_eq!(explanation.permissions_checked, vec!["tickets:view".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn logout_revokes_access_and_is_idempotent() {
    let f = fixture(clerk());
    f.shell.login(&creds()).await.unwrap();
    assert!(f.shell.can_access_module("customers"));
    assert!(f.shell.engine().cached_decisions() > 0);

    f.shell.logout().await;
    f.shell.logout().await;

    assert!(!f.shell.is_authenticated());
    assert!(!f.shell.can_access_module("customers"));
    assert_eq!(f.shell.engine().cached_decisions(), 0);
    assert_eq!(f.backend.logouts.load(Ordering::SeqCst), 1);
    assert_eq!(f.shell.get_session_info().state, Some(SessionState::Terminated));
}

#[tokio::test(start_paused = true)]
async fn operator_impersonation_is_audited_and_flushed() {
    let f = fixture(operator());
    f.shell.login(&creds()).await.unwrap();

    let target = ActorId::new();
    let window = f.shell.start_impersonation(target, Some(TenantId::new())).unwrap();
    assert_eq!(f.shell.impersonation(), Some(window.clone()));

    f.shell.track_action(ActionType::PageView, "/customers", None, None);
    f.shell.track_action(
        ActionType::Update,
        "customer",
        Some("c-42"),
        Some(json!({ "field": "email" })),
    );
    f.shell.track_action(ActionType::Export, "customer", None, None);
    assert_eq!(f.shell.audit().get_action_count(window.session_id), 3);

    assert_eq!(
        f.shell.start_impersonation(ActorId::new(), None),
        Err(DomainError::conflict("an impersonation window is already open"))
    );

    let summary = f.shell.end_impersonation().unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.count(ActionType::Update), 1);

    assert_eq!(f.sink.total_actions(), 3);
    let (flushed_window, _) = &f.sink.batches()[0];
    assert_eq!(flushed_window.as_ref().map(|w| w.target_actor_id), Some(target));

    assert_eq!(f.shell.audit().get_action_count(window.session_id), 0);
    assert!(f.shell.impersonation().is_none());
    assert!(f.shell.end_impersonation().is_none());
}

#[tokio::test(start_paused = true)]
async fn tenant_actor_cannot_impersonate() {
    let f = fixture(clerk());
    f.shell.login(&creds()).await.unwrap();
    assert_eq!(
        f.shell.start_impersonation(ActorId::new(), None),
        Err(DomainError::Unauthorized)
    );
}

#[tokio::test(start_paused = true)]
async fn impersonation_requires_a_session() {
    let f = fixture(operator());
    assert_eq!(
        f.shell.start_impersonation(ActorId::new(), None),
        Err(DomainError::Unauthorized)
    );
}

#[tokio::test(start_paused = true)]
async fn tracking_outside_a_window_is_dropped() {
    let f = fixture(operator());
    f.shell.login(&creds()).await.unwrap();
    f.shell.track_action(ActionType::Search, "customers", None, None);
    assert!(f.shell.audit().active_sessions().is_empty());
    let session_id = f.shell.get_session_info().session_id.unwrap();
    assert_eq!(f.shell.audit().get_action_count(session_id), 0);
}

#[tokio::test(start_paused = true)]
async fn logout_closes_an_open_impersonation_window() {
    let f = fixture(operator());
    f.shell.login(&creds()).await.unwrap();
    let window = f.shell.start_impersonation(ActorId::new(), None).unwrap();
    f.shell.track_action(ActionType::Delete, "ticket", Some("t-1"), None);

    f.shell.logout().await;

    assert!(f.shell.impersonation().is_none());
    assert!(f.shell.audit().active_sessions().is_empty());
    assert_eq!(f.shell.audit().get_action_count(window.session_id), 0);
    assert_eq!(f.sink.total_actions(), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_expiry_closes_the_window_and_revokes_access() {
    let f = fixture(operator());
    f.shell.init(MonitorHooks::new()).await.unwrap();
    f.shell.login(&creds()).await.unwrap();
    f.shell.start_impersonation(ActorId::new(), None).unwrap();
    f.shell.track_action(ActionType::PageView, "/tenants", None, None);

    tokio::time::sleep(Duration::from_secs(1801)).await;

    assert!(!f.shell.is_authenticated());
    assert!(!f.shell.can_access_module("tenants"));
    assert!(f.shell.audit().active_sessions().is_empty());
    assert_eq!(f.sink.total_actions(), 1);
}

#[tokio::test(start_paused = true)]
async fn init_runs_module_setups_in_dependency_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let registry = registry();
    for (descriptor, name) in [
        (ModuleDescriptor::operator_only("tenants"), "tenants"),
        (
            ModuleDescriptor::operator_only("platform_billing").with_dependency("tenants"),
            "platform_billing",
        ),
    ] {
        let order = order.clone();
        registry
            .register_with_setup(descriptor, move || {
                order.lock().unwrap().push(name);
                Ok(())
            })
            .unwrap();
    }
    let failing = ModuleDescriptor::tenant_scoped("reports", None);
    registry
        .register_with_setup(failing, || Err("warehouse offline".into()))
        .unwrap();

    let f = fixture_with(operator(), registry, Arc::new(InMemoryKv::new()));
    let summary = f.shell.init(MonitorHooks::new()).await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["tenants", "platform_billing"]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].name.as_str(), "reports");
    assert!(matches!(summary.failed[0].error, RegistryError::SetupFailed { .. }));
    assert!(f.shell.session().is_monitoring());
}

#[tokio::test(start_paused = true)]
async fn init_restores_a_persisted_session() {
    let kv = Arc::new(InMemoryKv::new());
    let actor = clerk();

    let first = fixture_with(actor.clone(), registry(), kv.clone());
    first.shell.login(&creds()).await.unwrap();

    let second = fixture_with(actor.clone(), registry(), kv);
    second.shell.init(MonitorHooks::new()).await.unwrap();
    assert!(second.shell.is_authenticated());
    assert_eq!(second.shell.current_actor(), Some(actor));
    assert!(second.shell.can_access_module("customers"));
}

#[tokio::test(start_paused = true)]
async fn idle_expiry_applies_to_every_session_after_relogin() {
    let f = fixture(operator());
    f.shell.init(MonitorHooks::new()).await.unwrap();

    f.shell.login(&creds()).await.unwrap();
    f.shell.logout().await;
    f.shell.login(&creds()).await.unwrap();
    assert!(f.shell.session().is_monitoring());

    tokio::time::sleep(Duration::from_secs(1801)).await;

    let info = f.shell.get_session_info();
    assert!(!info.is_valid);
    assert_eq!(info.state, Some(SessionState::Expired));
    assert!(!f.shell.can_access_module("tenants"));

    f.shell.record_activity();
    assert!(!f.shell.is_authenticated());
    assert!(!f.shell.can_access_module("tenants"));
}

#[tokio::test(start_paused = true)]
async fn rejected_audit_flush_survives_a_new_window() {
    let clock = TokioClock::anchored_at(Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap());
    let backend = Arc::new(DirectoryBackend::new(clock, operator()));
    let shell = AppShell::builder(ShellConfig::default(), registry(), backend)
        .clock(Arc::new(clock))
        .audit_sink(Arc::new(OfflineAuditSink))
        .build()
        .unwrap();
    shell.login(&creds()).await.unwrap();

    let first = shell.start_impersonation(ActorId::new(), None).unwrap();
    shell.track_action(ActionType::Export, "customer", None, None);
    assert_eq!(shell.end_impersonation().map(|s| s.total), Some(1));
    assert_eq!(shell.audit().get_action_count(first.session_id), 1);

    let second = shell.start_impersonation(ActorId::new(), None).unwrap();
    assert_ne!(second.session_id, first.session_id);
    shell.track_action(ActionType::PageView, "/tenants", None, None);

    assert_eq!(shell.audit().get_action_count(first.session_id), 1);
    assert_eq!(shell.audit().get_action_count(second.session_id), 1);
    assert_eq!(shell.audit().unflushed_sessions(), vec![first.clone()]);

    let retry = InMemoryAuditSink::new();
    assert_eq!(shell.audit().flush_session(first.session_id, &retry), Ok(1));
    assert_eq!(
        retry.batches()[0].0.as_ref().map(|w| w.target_actor_id),
        Some(first.target_actor_id)
    );
}
