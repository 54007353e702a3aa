//! Session state machine.
//!
//! Pure and deterministic: every input carries the time it happened at, and
//! the machine never reads a clock. Timers elsewhere only decide *when* to
//! call [`SessionMachine::tick`]; the machine decides *what* happens.
//!
//! ```text
//!            login / restore
//!                  │
//!                  ▼
//!   ┌──────────► Active ──── idle ≥ timeout − lead ───► IdleWarning
//!   │              │                                       │   │
//!   └── activity ──┼───────────────────────────────────────┘   │
//!                  │ idle ≥ timeout, token expiry,             │
//!                  │ refresh failure                           │
//!                  ▼                                           │
//!               Expired ◄──────────────────────────────────────┘
//!
//!   any ── logout ──► Terminated
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tenantgate_auth::SessionToken;
use tenantgate_core::{DomainError, DomainResult, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    IdleWarning,
    Expired,
    Terminated,
}

impl SessionState {
    /// `Active` or `IdleWarning`.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::IdleWarning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryCause {
    IdleTimeout,
    TokenExpired,
    RefreshFailed,
}

/// A state change produced by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    WarningRaised { remaining: Duration },
    ActivityResumed,
    TokenRefreshed { expires_at: DateTime<Utc> },
    Expired { cause: ExpiryCause },
    Terminated,
}

/// Inputs accepted by [`SessionMachine::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    Activity,
    Tick,
    RefreshSucceeded(SessionToken),
    RefreshFailed,
    Terminate,
}

/// Idle timing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    idle_timeout: chrono::Duration,
    warning_lead: chrono::Duration,
}

impl IdlePolicy {
    pub fn new(idle_timeout: Duration, warning_lead: Duration) -> DomainResult<Self> {
        let idle_timeout = chrono::Duration::from_std(idle_timeout)
            .map_err(|_| DomainError::validation("idle timeout out of range"))?;
        let warning_lead = chrono::Duration::from_std(warning_lead)
            .map_err(|_| DomainError::validation("warning lead time out of range"))?;
        if idle_timeout <= chrono::Duration::zero() {
            return Err(DomainError::validation("idle timeout must be positive"));
        }
        if warning_lead >= idle_timeout {
            return Err(DomainError::validation(
                "warning lead time must be shorter than the idle timeout",
            ));
        }
        Ok(Self {
            idle_timeout,
            warning_lead,
        })
    }

    pub fn idle_timeout(&self) -> chrono::Duration {
        self.idle_timeout
    }

    pub fn warning_lead(&self) -> chrono::Duration {
        self.warning_lead
    }
}

/// The authenticated session. Owned by the machine; other components only
/// ever see copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub token: SessionToken,
    pub issued_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: SessionState,
}

impl Session {
    pub fn warning_at(&self, policy: &IdlePolicy) -> DateTime<Utc> {
        self.last_activity_at + (policy.idle_timeout - policy.warning_lead)
    }

    pub fn idle_expiry_at(&self, policy: &IdlePolicy) -> DateTime<Utc> {
        self.last_activity_at + policy.idle_timeout
    }

    /// Whichever comes first: idle expiry or token expiry.
    pub fn deadline(&self, policy: &IdlePolicy) -> DateTime<Utc> {
        self.idle_expiry_at(policy).min(self.expires_at)
    }
}

/// Read-only snapshot, safe for any caller including render paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub is_valid: bool,
    /// Until the earlier of idle expiry and token hard expiry; zero when invalid.
    pub time_until_expiry: Duration,
    pub idle_time: Duration,
    pub state: Option<SessionState>,
    pub session_id: Option<SessionId>,
}

impl SessionInfo {
    pub fn unauthenticated() -> Self {
        Self {
            is_valid: false,
            time_until_expiry: Duration::ZERO,
            idle_time: Duration::ZERO,
            state: None,
            session_id: None,
        }
    }
}

pub(crate) fn to_std(d: chrono::Duration) -> Duration {
    d.to_std().unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    policy: IdlePolicy,
    session: Option<Session>,
}

impl SessionMachine {
    pub fn new(policy: IdlePolicy) -> Self {
        Self {
            policy,
            session: None,
        }
    }

    pub fn policy(&self) -> &IdlePolicy {
        &self.policy
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn state(&self) -> Option<SessionState> {
        self.session.as_ref().map(|s| s.state)
    }

    pub fn is_live(&self) -> bool {
        self.state().is_some_and(|s| s.is_live())
    }

    /// Single mutation entry point for everything after [`Self::begin`].
    pub fn apply(&mut self, input: SessionInput, now: DateTime<Utc>) -> Vec<Transition> {
        let transition = match input {
            SessionInput::Activity => self.record_activity(now),
            SessionInput::Tick => self.tick(now),
            SessionInput::RefreshSucceeded(token) => self.refresh_succeeded(token),
            SessionInput::RefreshFailed => self.refresh_failed(),
            SessionInput::Terminate => self.terminate(),
        };
        transition.into_iter().collect()
    }

    /// Start a fresh `Active` session, replacing whatever was there.
    pub fn begin(
        &mut self,
        id: SessionId,
        token: SessionToken,
        last_activity_at: DateTime<Utc>,
    ) -> &Session {
        let session = Session {
            id,
            issued_at: token.issued_at,
            expires_at: token.expires_at,
            token,
            last_activity_at,
            state: SessionState::Active,
        };
        self.session.insert(session)
    }

    /// Activity signal. Ignored unless the session is live; a signal arriving
    /// after expiry never resurrects the session.
    ///
    /// An expiry that is already due but has not been ticked yet wins: the
    /// session expires instead of being extended.
    pub fn record_activity(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        let overdue = {
            let session = self.session.as_ref()?;
            if !session.state.is_live() {
                return None;
            }
            now >= session.deadline(&self.policy)
        };
        if overdue {
            return self.tick(now);
        }

        let session = self.session.as_mut()?;
        if now > session.last_activity_at {
            session.last_activity_at = now;
        }
        if session.state == SessionState::IdleWarning {
            session.state = SessionState::Active;
            return Some(Transition::ActivityResumed);
        }
        None
    }

    /// Evaluate time-based transitions at `now`.
    ///
    /// A late tick that has already passed the idle timeout expires directly
    /// without emitting a warning first.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        let policy = self.policy;
        let session = self.session.as_mut()?;
        if !session.state.is_live() {
            return None;
        }

        if now >= session.expires_at {
            session.state = SessionState::Expired;
            return Some(Transition::Expired {
                cause: ExpiryCause::TokenExpired,
            });
        }

        let idle_expiry_at = session.idle_expiry_at(&policy);
        if now >= idle_expiry_at {
            session.state = SessionState::Expired;
            return Some(Transition::Expired {
                cause: ExpiryCause::IdleTimeout,
            });
        }

        if session.state == SessionState::Active && now >= session.warning_at(&policy) {
            session.state = SessionState::IdleWarning;
            return Some(Transition::WarningRaised {
                remaining: to_std(idle_expiry_at - now),
            });
        }

        None
    }

    /// Earliest instant at which [`Self::tick`] could change state.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let session = self.session.as_ref()?;
        let idle_deadline = match session.state {
            SessionState::Active => session.warning_at(&self.policy),
            SessionState::IdleWarning => session.idle_expiry_at(&self.policy),
            SessionState::Expired | SessionState::Terminated => return None,
        };
        Some(idle_deadline.min(session.expires_at))
    }

    pub fn refresh_succeeded(&mut self, token: SessionToken) -> Option<Transition> {
        let session = self.session.as_mut()?;
        if !session.state.is_live() {
            return None;
        }
        let expires_at = token.expires_at;
        session.expires_at = expires_at;
        session.token = token;
        Some(Transition::TokenRefreshed { expires_at })
    }

    pub fn refresh_failed(&mut self) -> Option<Transition> {
        let session = self.session.as_mut()?;
        if !session.state.is_live() {
            return None;
        }
        session.state = SessionState::Expired;
        Some(Transition::Expired {
            cause: ExpiryCause::RefreshFailed,
        })
    }

    /// Terminal. Returns `None` when there is no session or it is already
    /// terminated.
    pub fn terminate(&mut self) -> Option<Transition> {
        let session = self.session.as_mut()?;
        if session.state == SessionState::Terminated {
            return None;
        }
        session.state = SessionState::Terminated;
        Some(Transition::Terminated)
    }

    pub fn info(&self, now: DateTime<Utc>) -> SessionInfo {
        let Some(session) = self.session.as_ref() else {
            return SessionInfo::unauthenticated();
        };

        let idle_time = to_std(now - session.last_activity_at);
        let deadline = session.deadline(&self.policy);
        // a due expiry reads as expired even before the driver ticks
        let is_valid = session.state.is_live() && now < deadline;
        let time_until_expiry = if is_valid {
            to_std(deadline - now)
        } else {
            Duration::ZERO
        };

        SessionInfo {
            is_valid,
            time_until_expiry,
            idle_time,
            state: Some(session.state),
            session_id: Some(session.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn machine() -> SessionMachine {
        let policy = IdlePolicy::new(Duration::from_secs(1800), Duration::from_secs(300)).unwrap();
        let mut m = SessionMachine::new(policy);
        let token = SessionToken::new("tok", t(0), t(8 * 3600));
        m.begin(SessionId::new(), token, t(0));
        m
    }

    /// Drive the machine second by second, collecting transitions.
    fn run(m: &mut SessionMachine, from: i64, to: i64) -> Vec<(i64, Transition)> {
        (from..=to)
            .filter_map(|s| m.tick(t(s)).map(|tr| (s, tr)))
            .collect()
    }

    #[test]
    fn warning_then_expiry() {
        let mut m = machine();
        let transitions = run(&mut m, 0, 2000);
        assert_eq!(
            transitions,
            vec![
                (
                    1500,
                    Transition::WarningRaised {
                        remaining: Duration::from_secs(300)
                    }
                ),
                (
                    1800,
                    Transition::Expired {
                        cause: ExpiryCause::IdleTimeout
                    }
                ),
            ]
        );
        assert_eq!(m.state(), Some(SessionState::Expired));
    }

    #[test]
    fn activity_during_warning_postpones_next_warning() {
        let mut m = machine();
        run(&mut m, 0, 1600);
        assert_eq!(m.state(), Some(SessionState::IdleWarning));

        assert_eq!(m.record_activity(t(1600)), Some(Transition::ActivityResumed));
        assert_eq!(m.state(), Some(SessionState::Active));
        assert_eq!(m.next_deadline(), Some(t(3100)));

        let transitions = run(&mut m, 1601, 3100);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].0, 3100);
    }

    #[test]
    fn late_activity_cannot_resurrect() {
        let mut m = machine();
        m.tick(t(1800));
        assert_eq!(m.state(), Some(SessionState::Expired));
        assert_eq!(m.record_activity(t(1801)), None);
        assert_eq!(m.state(), Some(SessionState::Expired));
        assert!(!m.info(t(1801)).is_valid);
    }

    #[test]
    fn overdue_activity_expires_instead_of_extending() {
        let mut m = machine();
        assert_eq!(
            m.record_activity(t(1900)),
            Some(Transition::Expired {
                cause: ExpiryCause::IdleTimeout
            })
        );
        assert_eq!(m.state(), Some(SessionState::Expired));
        assert_eq!(m.session().map(|s| s.last_activity_at), Some(t(0)));
        assert!(!m.info(t(1900)).is_valid);
    }

    #[test]
    fn info_reports_a_due_idle_expiry_before_any_tick() {
        let m = machine();
        let info = m.info(t(1800));
        assert!(!info.is_valid);
        assert_eq!(info.time_until_expiry, Duration::ZERO);
        // only a tick or an activity signal changes state
        assert_eq!(info.state, Some(SessionState::Active));
        assert!(m.info(t(1799)).is_valid);
    }

    #[test]
    fn hard_expiry_wins_over_idle() {
        let policy = IdlePolicy::new(Duration::from_secs(1800), Duration::from_secs(300)).unwrap();
        let mut m = SessionMachine::new(policy);
        m.begin(SessionId::new(), SessionToken::new("tok", t(0), t(600)), t(0));

        assert_eq!(m.next_deadline(), Some(t(600)));
        assert_eq!(
            m.tick(t(600)),
            Some(Transition::Expired {
                cause: ExpiryCause::TokenExpired
            })
        );
    }

    #[test]
    fn refresh_moves_hard_expiry() {
        let policy = IdlePolicy::new(Duration::from_secs(1800), Duration::from_secs(300)).unwrap();
        let mut m = SessionMachine::new(policy);
        m.begin(SessionId::new(), SessionToken::new("tok", t(0), t(600)), t(0));

        let transition = m.refresh_succeeded(SessionToken::new("tok2", t(500), t(4000)));
        assert_eq!(transition, Some(Transition::TokenRefreshed { expires_at: t(4000) }));
        assert_eq!(m.next_deadline(), Some(t(1500)));
    }

    #[test]
    fn refresh_failure_expires() {
        let mut m = machine();
        assert_eq!(
            m.refresh_failed(),
            Some(Transition::Expired {
                cause: ExpiryCause::RefreshFailed
            })
        );
        assert_eq!(m.refresh_failed(), None);
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut m = machine();
        assert_eq!(m.terminate(), Some(Transition::Terminated));
        assert_eq!(m.terminate(), None);
        assert_eq!(m.next_deadline(), None);
        assert_eq!(m.tick(t(99_999)), None);
    }

    #[test]
    fn info_is_pure_and_bounded_by_nearest_expiry() {
        let m = machine();
        let info = m.info(t(100));
        assert!(info.is_valid);
        assert_eq!(info.idle_time, Duration::from_secs(100));
        assert_eq!(info.time_until_expiry, Duration::from_secs(1700));
        assert_eq!(m.state(), Some(SessionState::Active));
    }

    #[test]
    fn policy_rejects_lead_longer_than_timeout() {
        assert!(IdlePolicy::new(Duration::from_secs(60), Duration::from_secs(60)).is_err());
        assert!(IdlePolicy::new(Duration::ZERO, Duration::ZERO).is_err());
    }

    #[test]
    fn apply_routes_inputs() {
        let mut m = machine();
        assert!(m.apply(SessionInput::Tick, t(10)).is_empty());
        assert_eq!(
            m.apply(SessionInput::Tick, t(1500)),
            vec![Transition::WarningRaised {
                remaining: Duration::from_secs(300)
            }]
        );
        assert_eq!(
            m.apply(SessionInput::Activity, t(1550)),
            vec![Transition::ActivityResumed]
        );
        assert_eq!(
            m.apply(SessionInput::Terminate, t(1560)),
            vec![Transition::Terminated]
        );
    }

    #[test]
    fn empty_machine_is_unauthenticated() {
        let policy = IdlePolicy::new(Duration::from_secs(60), Duration::from_secs(10)).unwrap();
        let mut m = SessionMachine::new(policy);
        assert_eq!(m.info(t(0)), SessionInfo::unauthenticated());
        assert_eq!(m.record_activity(t(0)), None);
        assert_eq!(m.tick(t(0)), None);
        assert_eq!(m.terminate(), None);
    }
}
