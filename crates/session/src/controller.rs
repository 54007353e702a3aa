//! Session lifecycle controller.
//!
//! Owns the [`SessionMachine`] and wires it to the outside: two background
//! tasks per monitoring run (a deadline driver and an idle display sampler),
//! the auth backend, persisted session material and the lifecycle event bus.
//!
//! All mutations go through one `std::sync::Mutex`; no lock is held across an
//! `.await`. Every background task carries the generation it was started
//! with and exits as soon as that generation is no longer current, so a timer
//! that fires after `stop_monitoring()` never acts.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use tenantgate_auth::{Actor, SessionToken, validate_token};
use tenantgate_core::{ActorId, Clock, SessionId, TenantId};
use tenantgate_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};

use crate::collaborators::{AuthBackend, Credentials, NotificationSink, NotifyLevel, PersistedKv};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::SessionEvent;
use crate::machine::{
    ExpiryCause, IdlePolicy, SessionInfo, SessionInput, SessionMachine, SessionState, Transition,
    to_std,
};

type ExpiryHook = Arc<dyn Fn(ExpiryCause) + Send + Sync>;
type WarningHook = Arc<dyn Fn(Duration) + Send + Sync>;
type ResumeHook = Arc<dyn Fn() + Send + Sync>;
type TeardownHook = Arc<dyn Fn() + Send + Sync>;

/// Callbacks invoked while monitoring is active.
#[derive(Clone, Default)]
pub struct MonitorHooks {
    on_expiry: Option<ExpiryHook>,
    on_idle_warning: Option<WarningHook>,
    on_activity_resumed: Option<ResumeHook>,
}

impl MonitorHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_expiry(mut self, f: impl Fn(ExpiryCause) + Send + Sync + 'static) -> Self {
        self.on_expiry = Some(Arc::new(f));
        self
    }

    /// Receives the time left before idle expiry.
    pub fn on_idle_warning(mut self, f: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.on_idle_warning = Some(Arc::new(f));
        self
    }

    pub fn on_activity_resumed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_activity_resumed = Some(Arc::new(f));
        self
    }
}

impl core::fmt::Debug for MonitorHooks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MonitorHooks")
            .field("on_expiry", &self.on_expiry.is_some())
            .field("on_idle_warning", &self.on_idle_warning.is_some())
            .field("on_activity_resumed", &self.on_activity_resumed.is_some())
            .finish()
    }
}

/// An operator acting on behalf of another actor within the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpersonationContext {
    /// Identifies this window alone; audit logs are keyed by it.
    pub window_id: SessionId,
    /// The login session the window was opened in.
    pub session_id: SessionId,
    pub operator_actor_id: ActorId,
    pub target_actor_id: ActorId,
    pub tenant_id: Option<TenantId>,
    pub started_at: DateTime<Utc>,
}

/// Session material as written to [`PersistedKv`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    session_id: SessionId,
    actor: Actor,
    token: SessionToken,
    last_activity_at: DateTime<Utc>,
}

struct ControllerState {
    machine: SessionMachine,
    actor: Option<Actor>,
    impersonation: Option<ImpersonationContext>,
    logging_out: bool,

    /// Set by `start_monitoring`, cleared only by `stop_monitoring`. While
    /// armed, every session that begins gets fresh timers.
    monitor_armed: bool,
    monitor_generation: Option<u64>,
    next_generation: u64,
    monitor_tasks: Vec<JoinHandle<()>>,
    hooks: MonitorHooks,
    teardown_hooks: Vec<TeardownHook>,

    /// Token expiry for which a proactive refresh was already started.
    refresh_scheduled_for: Option<DateTime<Utc>>,
    /// Bumped after every completed backend refresh.
    refresh_generation: u64,
    last_refresh: Option<Result<DateTime<Utc>, SessionError>>,
}

impl ControllerState {
    fn is_current(&self, generation: u64) -> bool {
        self.monitor_generation == Some(generation)
    }

    fn halt_monitoring(&mut self) {
        self.monitor_generation = None;
        for task in self.monitor_tasks.drain(..) {
            task.abort();
        }
    }

    fn persisted(&self) -> Option<PersistedSession> {
        let session = self.machine.session()?;
        let actor = self.actor.clone()?;
        Some(PersistedSession {
            session_id: session.id,
            actor,
            token: session.token.clone(),
            last_activity_at: session.last_activity_at,
        })
    }
}

/// Side effects collected under the state lock and executed after it is
/// released.
#[derive(Default)]
struct Effects {
    events: Vec<SessionEvent>,
    persist: Option<PersistedSession>,
    clear_storage: bool,
    hooks: MonitorHooks,
    teardown: Vec<TeardownHook>,
}

struct Inner {
    config: SessionConfig,
    refresh_lead: chrono::Duration,
    clock: Arc<dyn Clock>,
    backend: Arc<dyn AuthBackend>,
    storage: Arc<dyn PersistedKv>,
    notifier: Arc<dyn NotificationSink>,
    bus: InMemoryEventBus<EventEnvelope<SessionEvent>>,
    state: Mutex<ControllerState>,
    wake: Notify,
    refresh_gate: tokio::sync::Mutex<()>,
    logout_gate: tokio::sync::Mutex<()>,
    idle_tx: watch::Sender<Duration>,
}

/// Authentication state, idle tracking, expiry warnings, token refresh and
/// ordered logout for one client.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionLifecycleController {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for SessionLifecycleController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let st = self.lock_state();
        f.debug_struct("SessionLifecycleController")
            .field("state", &st.machine.state())
            .field("monitoring", &st.monitor_generation.is_some())
            .field("armed", &st.monitor_armed)
            .field("logging_out", &st.logging_out)
            .finish()
    }
}

impl SessionLifecycleController {
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn AuthBackend>,
        storage: Arc<dyn PersistedKv>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let policy: IdlePolicy = config.idle_policy()?;
        let refresh_lead = chrono::Duration::from_std(config.refresh_lead_time)
            .map_err(|_| SessionError::InvalidConfig("refresh lead time out of range".into()))?;
        let (idle_tx, _) = watch::channel(Duration::ZERO);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                refresh_lead,
                clock,
                backend,
                storage,
                notifier,
                bus: InMemoryEventBus::new(),
                state: Mutex::new(ControllerState {
                    machine: SessionMachine::new(policy),
                    actor: None,
                    impersonation: None,
                    logging_out: false,
                    monitor_armed: false,
                    monitor_generation: None,
                    next_generation: 0,
                    monitor_tasks: Vec::new(),
                    hooks: MonitorHooks::default(),
                    teardown_hooks: Vec::new(),
                    refresh_scheduled_for: None,
                    refresh_generation: 0,
                    last_refresh: None,
                }),
                wake: Notify::new(),
                refresh_gate: tokio::sync::Mutex::new(()),
                logout_gate: tokio::sync::Mutex::new(()),
                idle_tx,
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Pure snapshot. Reports an invalid session while logout is running.
    pub fn get_session_info(&self) -> SessionInfo {
        let now = self.inner.clock.now();
        let st = self.lock_state();
        let mut info = st.machine.info(now);
        if st.logging_out {
            info.is_valid = false;
            info.time_until_expiry = Duration::ZERO;
        }
        info
    }

    pub fn is_authenticated(&self) -> bool {
        self.get_session_info().is_valid
    }

    pub fn current_actor(&self) -> Option<Actor> {
        let now = self.inner.clock.now();
        let st = self.lock_state();
        if st.logging_out || !st.machine.info(now).is_valid {
            return None;
        }
        st.actor.clone()
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        let info = self.get_session_info();
        if info.is_valid { info.session_id } else { None }
    }

    pub fn impersonation(&self) -> Option<ImpersonationContext> {
        self.lock_state().impersonation.clone()
    }

    pub fn is_monitoring(&self) -> bool {
        self.lock_state().monitor_generation.is_some()
    }

    pub fn subscribe(&self) -> Subscription<EventEnvelope<SessionEvent>> {
        self.inner.bus.subscribe()
    }

    /// Idle time sampled on the display tick.
    pub fn subscribe_idle_time(&self) -> watch::Receiver<Duration> {
        self.inner.idle_tx.subscribe()
    }

    /// Runs whenever a session ends, by logout or by expiry.
    pub fn register_teardown_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.lock_state().teardown_hooks.push(Arc::new(hook));
    }

    // ---------------------------------------------------------------------
    // Monitoring
    // ---------------------------------------------------------------------

    /// Start (or re-arm) the deadline driver and the idle sampler.
    ///
    /// Calling this while already monitoring replaces the hooks and
    /// recomputes deadlines from the current `last_activity_at`; it never
    /// spawns a second set of tasks. Monitoring stays armed across sessions:
    /// logout and expiry cancel the timers, and the next login or restore
    /// starts them again with the same hooks.
    pub fn start_monitoring(&self, hooks: MonitorHooks) -> Result<(), SessionError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        let mut st = self.lock_state();
        st.hooks = hooks;
        st.monitor_armed = true;
        if st.monitor_generation.is_some() {
            drop(st);
            self.inner.wake.notify_one();
            return Ok(());
        }
        self.spawn_monitor(&mut st, &runtime);
        Ok(())
    }

    /// Cancel both timers and disarm. Safe to call when not monitoring.
    pub fn stop_monitoring(&self) {
        let mut st = self.lock_state();
        if st.monitor_generation.is_some() {
            tracing::debug!("session monitoring stopped");
        }
        st.halt_monitoring();
        st.monitor_armed = false;
        st.hooks = MonitorHooks::default();
    }

    fn spawn_monitor(&self, st: &mut ControllerState, runtime: &tokio::runtime::Handle) {
        let generation = st.next_generation;
        st.next_generation += 1;
        st.monitor_generation = Some(generation);

        let driver = runtime.spawn(self.clone().run_driver(generation));
        let sampler = runtime.spawn(self.clone().run_sampler(generation));
        st.monitor_tasks = vec![driver, sampler];

        tracing::debug!(generation, "session monitoring started");
    }

    /// Restart the timers for a session that just began, if monitoring is
    /// armed and they are not already running.
    fn rearm_monitoring(&self, st: &mut ControllerState) {
        if !st.monitor_armed || st.monitor_generation.is_some() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => self.spawn_monitor(st, &runtime),
            Err(_) => tracing::warn!("no runtime to re-arm session monitoring"),
        }
    }

    /// Expire a session whose deadline passed without a tick, so the new
    /// session does not silently replace it.
    fn settle_overdue(&self, st: &mut ControllerState, now: DateTime<Utc>) -> Effects {
        let transitions = st.machine.apply(SessionInput::Tick, now);
        self.absorb(st, transitions, now)
    }

    async fn run_driver(self, generation: u64) {
        loop {
            let wake_at = {
                let st = self.lock_state();
                if !st.is_current(generation) {
                    return;
                }
                self.next_wake(&st)
            };

            match wake_at {
                Some(at) => {
                    let delay = to_std(at - self.inner.clock.now());
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.inner.wake.notified() => {}
                    }
                }
                None => self.inner.wake.notified().await,
            }

            self.on_timer(generation);
        }
    }

    async fn run_sampler(self, generation: u64) {
        let mut interval = tokio::time::interval(self.inner.config.idle_sample_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let idle = {
                let st = self.lock_state();
                if !st.is_current(generation) {
                    return;
                }
                if st.machine.is_live() {
                    st.machine.info(self.inner.clock.now()).idle_time
                } else {
                    Duration::ZERO
                }
            };
            self.inner.idle_tx.send_replace(idle);
        }
    }

    fn refresh_due_at(&self, st: &ControllerState) -> Option<DateTime<Utc>> {
        let session = st.machine.session()?;
        if !session.state.is_live() || st.refresh_scheduled_for == Some(session.expires_at) {
            return None;
        }
        Some(session.expires_at - self.inner.refresh_lead)
    }

    fn next_wake(&self, st: &ControllerState) -> Option<DateTime<Utc>> {
        match (st.machine.next_deadline(), self.refresh_due_at(st)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn on_timer(&self, generation: u64) {
        let now = self.inner.clock.now();
        let (effects, start_refresh) = {
            let mut st = self.lock_state();
            if !st.is_current(generation) {
                return;
            }
            let transitions = st.machine.apply(SessionInput::Tick, now);
            let mut start_refresh = false;
            if let Some(refresh_at) = self.refresh_due_at(&st) {
                if now >= refresh_at {
                    st.refresh_scheduled_for = st.machine.session().map(|s| s.expires_at);
                    start_refresh = true;
                }
            }
            (self.absorb(&mut st, transitions, now), start_refresh)
        };
        self.dispatch(effects);

        if start_refresh {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(error) = this.refresh_token().await {
                    tracing::debug!(%error, "proactive refresh did not complete");
                }
            });
        }
    }

    // ---------------------------------------------------------------------
    // Activity
    // ---------------------------------------------------------------------

    /// Ignored unless a session is live. Rapid signals collapse: only a
    /// state change wakes the driver.
    pub fn record_activity(&self) {
        let now = self.inner.clock.now();
        let effects = {
            let mut st = self.lock_state();
            if st.logging_out {
                return;
            }
            let transitions = st.machine.apply(SessionInput::Activity, now);
            if transitions.is_empty() {
                return;
            }
            self.absorb(&mut st, transitions, now)
        };
        self.inner.wake.notify_one();
        self.dispatch(effects);
    }

    /// Explicit "keep me signed in" from the warning prompt.
    pub fn extend_session(&self) -> Result<SessionInfo, SessionError> {
        let now = self.inner.clock.now();
        let effects = {
            let mut st = self.lock_state();
            if st.logging_out {
                return Err(SessionError::LogoutInProgress);
            }
            // Let a due expiry win before the extension is considered.
            let mut transitions = st.machine.apply(SessionInput::Tick, now);
            if !st.machine.is_live() {
                let effects = self.absorb(&mut st, transitions, now);
                let expired = st.machine.state().is_some();
                drop(st);
                self.dispatch(effects);
                return Err(if expired {
                    SessionError::SessionExpired
                } else {
                    SessionError::NotAuthenticated
                });
            }
            transitions.extend(st.machine.apply(SessionInput::Activity, now));
            let mut effects = self.absorb(&mut st, transitions, now);
            if let Some(session_id) = st.machine.session().map(|s| s.id) {
                effects.events.push(SessionEvent::Extended { session_id, at: now });
            }
            effects.persist = st.persisted();
            effects
        };
        self.inner.wake.notify_one();
        self.dispatch(effects);
        Ok(self.get_session_info())
    }

    // ---------------------------------------------------------------------
    // Authentication
    // ---------------------------------------------------------------------

    pub async fn login(&self, credentials: &Credentials) -> Result<Actor, SessionError> {
        {
            let st = self.lock_state();
            if st.logging_out {
                return Err(SessionError::LogoutInProgress);
            }
        }
        if self.is_authenticated() {
            return Err(SessionError::AlreadyAuthenticated);
        }

        let outcome = match self.inner.backend.login(credentials).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(%error, username = %credentials.username, "login failed");
                self.inner
                    .notifier
                    .notify(NotifyLevel::Error, "Sign-in failed", &error.to_string());
                return Err(error.into());
            }
        };

        let now = self.inner.clock.now();
        validate_token(&outcome.token, now)?;

        let effects = {
            let mut st = self.lock_state();
            if st.logging_out {
                return Err(SessionError::LogoutInProgress);
            }
            if st.machine.info(now).is_valid {
                return Err(SessionError::AlreadyAuthenticated);
            }
            let mut effects = self.settle_overdue(&mut st, now);

            let session_id = SessionId::new();
            st.machine.begin(session_id, outcome.token, now);
            st.actor = Some(outcome.actor.clone());
            st.impersonation = None;
            st.refresh_scheduled_for = None;
            self.rearm_monitoring(&mut st);

            tracing::info!(
                session_id = %session_id,
                actor_id = %outcome.actor.id(),
                scope = ?outcome.actor.scope(),
                "login succeeded"
            );

            effects.events.push(SessionEvent::LoggedIn {
                session_id,
                actor_id: outcome.actor.id(),
                at: now,
            });
            effects.persist = st.persisted();
            effects
        };
        self.inner.wake.notify_one();
        self.dispatch(effects);
        Ok(outcome.actor)
    }

    /// Rebuild a session from persisted material.
    ///
    /// Fails closed: missing, corrupt, expired or backend-rejected material
    /// leaves the controller unauthenticated. Everything except a backend
    /// outage also removes the stored key.
    pub async fn restore(&self) -> bool {
        if self.is_authenticated() {
            return true;
        }
        let key = self.inner.config.storage_key.as_str();

        let raw = match self.inner.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(error) => {
                tracing::warn!(%error, "session storage unreadable; starting unauthenticated");
                return false;
            }
        };

        let persisted: PersistedSession = match serde_json::from_str(&raw) {
            Ok(persisted) => persisted,
            Err(error) => {
                tracing::warn!(%error, "discarding corrupt session material");
                self.discard_persisted();
                return false;
            }
        };

        let now = self.inner.clock.now();
        let idle_timeout = self.lock_state().machine.policy().idle_timeout();
        let idle_limit = persisted.last_activity_at + idle_timeout;
        if validate_token(&persisted.token, now).is_err() || now >= idle_limit {
            tracing::info!(session_id = %persisted.session_id, "persisted session has expired");
            self.discard_persisted();
            return false;
        }

        let actor = match self.inner.backend.get_current_actor().await {
            Ok(Some(actor)) if actor.id() == persisted.actor.id() => actor,
            Ok(_) => {
                tracing::warn!(session_id = %persisted.session_id, "backend rejected persisted session");
                self.discard_persisted();
                return false;
            }
            Err(error) => {
                tracing::warn!(%error, "backend unavailable during restore");
                return false;
            }
        };

        let now = self.inner.clock.now();
        let effects = {
            let mut st = self.lock_state();
            if st.logging_out {
                return false;
            }
            if st.machine.info(now).is_valid {
                return true;
            }
            let mut effects = self.settle_overdue(&mut st, now);

            let session_id = persisted.session_id;
            st.machine
                .begin(session_id, persisted.token, persisted.last_activity_at.min(now));
            st.actor = Some(actor.clone());
            st.impersonation = None;
            st.refresh_scheduled_for = None;
            self.rearm_monitoring(&mut st);
            tracing::info!(session_id = %session_id, actor_id = %actor.id(), "session restored");

            effects.events.push(SessionEvent::Restored {
                session_id,
                actor_id: actor.id(),
                at: now,
            });
            effects
        };
        self.inner.wake.notify_one();
        self.dispatch(effects);
        true
    }

    /// Refresh the token through the backend.
    ///
    /// A single attempt: failure expires the session. Callers arriving while
    /// a refresh is in flight wait for it and share its outcome.
    pub async fn refresh_token(&self) -> Result<DateTime<Utc>, SessionError> {
        let observed = self.lock_state().refresh_generation;
        let _gate = self.inner.refresh_gate.lock().await;

        let session_id = {
            let st = self.lock_state();
            if st.refresh_generation != observed {
                if let Some(outcome) = st.last_refresh.clone() {
                    return outcome;
                }
            }
            if st.logging_out {
                return Err(SessionError::LogoutInProgress);
            }
            match st.machine.session() {
                Some(session) if session.state.is_live() => session.id,
                Some(_) => return Err(SessionError::SessionExpired),
                None => return Err(SessionError::NotAuthenticated),
            }
        };

        let result = self.inner.backend.refresh_token().await;
        let now = self.inner.clock.now();

        let (effects, outcome) = {
            let mut st = self.lock_state();
            let same_session = st
                .machine
                .session()
                .is_some_and(|s| s.id == session_id && s.state.is_live());
            if !same_session || st.logging_out {
                return Err(SessionError::Terminated);
            }

            let token = result
                .map_err(|e| SessionError::RefreshFailure(e.to_string()))
                .and_then(|token| {
                    validate_token(&token, now)
                        .map(|()| token)
                        .map_err(|e| SessionError::RefreshFailure(e.to_string()))
                });

            let (transitions, outcome) = match token {
                Ok(token) => {
                    let expires_at = token.expires_at;
                    let transitions = st.machine.apply(SessionInput::RefreshSucceeded(token), now);
                    tracing::info!(session_id = %session_id, %expires_at, "token refreshed");
                    (transitions, Ok(expires_at))
                }
                Err(error) => {
                    tracing::warn!(session_id = %session_id, %error, "token refresh failed");
                    (st.machine.apply(SessionInput::RefreshFailed, now), Err(error))
                }
            };

            let mut effects = self.absorb(&mut st, transitions, now);
            if outcome.is_ok() {
                effects.persist = st.persisted();
            }
            st.refresh_generation += 1;
            st.last_refresh = Some(outcome.clone());
            (effects, outcome)
        };
        self.inner.wake.notify_one();
        self.dispatch(effects);
        outcome
    }

    /// Ordered teardown. Idempotent: a second call after completion is a
    /// no-op, and concurrent calls wait for the first one.
    pub async fn logout(&self) {
        let _gate = self.inner.logout_gate.lock().await;

        let session_id = {
            let mut st = self.lock_state();
            if matches!(st.machine.state(), None | Some(SessionState::Terminated)) {
                return;
            }
            st.logging_out = true;
            st.machine.session().map(|s| s.id)
        };
        tracing::info!(session_id = ?session_id, "logout started");

        // 1. timers; monitoring stays armed for the next login
        self.lock_state().halt_monitoring();

        // 2. persisted material
        self.discard_persisted();

        // 3. backend, best effort
        if let Err(error) = self.inner.backend.logout().await {
            tracing::warn!(%error, "backend logout failed; continuing local teardown");
        }

        // 4. impersonation and tenant context
        let teardown = {
            let mut st = self.lock_state();
            st.impersonation = None;
            st.teardown_hooks.clone()
        };
        for hook in &teardown {
            hook();
        }

        // 5. terminal state
        {
            let mut st = self.lock_state();
            st.machine.apply(SessionInput::Terminate, self.inner.clock.now());
            st.actor = None;
            st.refresh_scheduled_for = None;
        }

        // 6. settle
        tokio::time::sleep(self.inner.config.logout_settle_delay).await;

        let now = self.inner.clock.now();
        self.lock_state().logging_out = false;
        self.inner.idle_tx.send_replace(Duration::ZERO);
        self.publish(SessionEvent::LoggedOut { session_id, at: now });
        tracing::info!(session_id = ?session_id, "logout complete");
    }

    // ---------------------------------------------------------------------
    // Impersonation
    // ---------------------------------------------------------------------

    /// Open an impersonation window in the current session. Operators only.
    pub fn begin_impersonation(
        &self,
        target_actor_id: ActorId,
        tenant_id: Option<TenantId>,
    ) -> Result<ImpersonationContext, SessionError> {
        let now = self.inner.clock.now();
        let mut st = self.lock_state();
        if st.logging_out {
            return Err(SessionError::LogoutInProgress);
        }
        if !st.machine.info(now).is_valid {
            return Err(SessionError::NotAuthenticated);
        }
        let (session_id, operator) = match (st.machine.session(), st.actor.as_ref()) {
            (Some(session), Some(actor)) => (session.id, actor),
            _ => return Err(SessionError::NotAuthenticated),
        };
        if !operator.is_operator() {
            tracing::warn!(actor_id = %operator.id(), "non-operator attempted impersonation");
            return Err(SessionError::ImpersonationDenied);
        }
        if st.impersonation.is_some() {
            return Err(SessionError::ImpersonationActive);
        }

        let context = ImpersonationContext {
            window_id: SessionId::new(),
            session_id,
            operator_actor_id: operator.id(),
            target_actor_id,
            tenant_id,
            started_at: now,
        };
        tracing::info!(
            session_id = %session_id,
            window_id = %context.window_id,
            operator = %context.operator_actor_id,
            target = %target_actor_id,
            "impersonation started"
        );
        st.impersonation = Some(context.clone());
        Ok(context)
    }

    pub fn end_impersonation(&self) -> Option<ImpersonationContext> {
        let context = self.lock_state().impersonation.take();
        if let Some(context) = &context {
            tracing::info!(
                session_id = %context.session_id,
                window_id = %context.window_id,
                target = %context.target_actor_id,
                "impersonation ended"
            );
        }
        context
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    /// Translate machine transitions into effects. Expiry halts monitoring
    /// and tears down context in the same critical section.
    fn absorb(
        &self,
        st: &mut ControllerState,
        transitions: Vec<Transition>,
        now: DateTime<Utc>,
    ) -> Effects {
        let mut effects = Effects {
            hooks: st.hooks.clone(),
            ..Effects::default()
        };
        let Some(session_id) = st.machine.session().map(|s| s.id) else {
            return effects;
        };

        for transition in transitions {
            let event = match transition {
                Transition::WarningRaised { remaining } => {
                    tracing::info!(session_id = %session_id, remaining_secs = remaining.as_secs(), "idle warning");
                    SessionEvent::IdleWarning {
                        session_id,
                        remaining,
                        at: now,
                    }
                }
                Transition::ActivityResumed => SessionEvent::ActivityResumed { session_id, at: now },
                Transition::TokenRefreshed { expires_at } => SessionEvent::TokenRefreshed {
                    session_id,
                    expires_at,
                    at: now,
                },
                Transition::Expired { cause } => {
                    tracing::info!(session_id = %session_id, ?cause, "session expired");
                    st.halt_monitoring();
                    st.impersonation = None;
                    st.refresh_scheduled_for = None;
                    effects.clear_storage = true;
                    effects.teardown = st.teardown_hooks.clone();
                    SessionEvent::Expired {
                        session_id,
                        cause,
                        at: now,
                    }
                }
                Transition::Terminated => continue,
            };
            effects.events.push(event);
        }
        effects
    }

    fn dispatch(&self, effects: Effects) {
        if effects.clear_storage {
            self.discard_persisted();
        }
        if let Some(persisted) = &effects.persist {
            self.write_persisted(persisted);
        }

        for hook in &effects.teardown {
            hook();
        }

        for event in effects.events {
            match &event {
                SessionEvent::LoggedIn { .. } => {
                    self.inner
                        .notifier
                        .notify(NotifyLevel::Info, "Signed in", "Welcome back.");
                }
                SessionEvent::IdleWarning { remaining, .. } => {
                    self.inner.notifier.notify(
                        NotifyLevel::Warning,
                        "Session expiring soon",
                        &format!("Your session will expire in {} seconds.", remaining.as_secs()),
                    );
                    if let Some(hook) = &effects.hooks.on_idle_warning {
                        hook(*remaining);
                    }
                }
                SessionEvent::ActivityResumed { .. } => {
                    if let Some(hook) = &effects.hooks.on_activity_resumed {
                        hook();
                    }
                }
                SessionEvent::Expired { cause, .. } => {
                    let (level, title, detail) = match cause {
                        ExpiryCause::RefreshFailed => (
                            NotifyLevel::Error,
                            "Session refresh failed",
                            "Your session could not be renewed. Please sign in again.",
                        ),
                        ExpiryCause::IdleTimeout => (
                            NotifyLevel::Warning,
                            "Session expired",
                            "You were signed out after a period of inactivity.",
                        ),
                        ExpiryCause::TokenExpired => (
                            NotifyLevel::Warning,
                            "Session expired",
                            "Your session has reached its maximum lifetime.",
                        ),
                    };
                    self.inner.notifier.notify(level, title, detail);
                    if let Some(hook) = &effects.hooks.on_expiry {
                        hook(*cause);
                    }
                }
                _ => {}
            }
            self.publish(event);
        }
    }

    fn publish(&self, event: SessionEvent) {
        let envelope = EventEnvelope::wrap(event.session_id(), event);
        if let Err(error) = self.inner.bus.publish(envelope) {
            tracing::error!(?error, "failed to publish session event");
        }
    }

    fn write_persisted(&self, persisted: &PersistedSession) {
        let raw = match serde_json::to_string(persisted) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::error!(%error, "failed to encode session material");
                return;
            }
        };
        if let Err(error) = self.inner.storage.set(&self.inner.config.storage_key, &raw) {
            tracing::warn!(%error, "failed to persist session material");
        }
    }

    fn discard_persisted(&self) {
        if let Err(error) = self.inner.storage.remove(&self.inner.config.storage_key) {
            tracing::warn!(%error, "failed to clear persisted session material");
        }
    }
}
