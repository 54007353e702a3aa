use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why an access decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Operator reaching an operator-only module.
    OperatorModule,
    /// Tenant actor holding the module's permission.
    PermissionGranted,
    Unauthenticated,
    /// Operators never reach tenant-scoped modules.
    OperatorIsolation,
    /// Tenant actors never reach operator-only modules.
    TenantIsolation,
    InsufficientPermission,
    NoPermissionMapping,
    UnknownModule,
    /// The permission authority failed; treated as deny.
    EvaluationError,
}

impl ReasonCode {
    pub fn is_isolation(&self) -> bool {
        matches!(self, ReasonCode::OperatorIsolation | ReasonCode::TenantIsolation)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ReasonCode::OperatorModule => "operator reaching an operator-only module",
            ReasonCode::PermissionGranted => "tenant actor holds the module permission",
            ReasonCode::Unauthenticated => "no authenticated actor",
            ReasonCode::OperatorIsolation => "operators cannot reach tenant-scoped modules",
            ReasonCode::TenantIsolation => "tenant actors cannot reach operator-only modules",
            ReasonCode::InsufficientPermission => "tenant actor lacks the module permission",
            ReasonCode::NoPermissionMapping => "module declares no permission key",
            ReasonCode::UnknownModule => "module is not registered",
            ReasonCode::EvaluationError => "permission evaluation failed",
        }
    }
}

impl core::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.describe())
    }
}

/// Outcome of one access check. Re-derivable; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: ReasonCode,
    pub evaluated_at: DateTime<Utc>,
}

impl AccessDecision {
    pub fn allow(reason: ReasonCode, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            reason,
            evaluated_at,
        }
    }

    pub fn deny(reason: ReasonCode, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            reason,
            evaluated_at,
        }
    }
}
