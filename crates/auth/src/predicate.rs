use serde::{Deserialize, Serialize};
use thiserror::Error;

use tenantgate_core::Permission;

use crate::Actor;

/// Failure raised by a permission authority.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PredicateError {
    #[error("permission authority unavailable: {0}")]
    Unavailable(String),

    #[error("permission evaluation failed: {0}")]
    Failed(String),
}

/// External permission authority.
///
/// Must be synchronous and side-effect free. Errors (and panics) are turned
/// into deny decisions by the engine.
pub trait PermissionPredicate: Send + Sync {
    fn has_permission(&self, actor: &Actor, permission: &Permission) -> Result<bool, PredicateError>;
}

impl<F> PermissionPredicate for F
where
    F: Fn(&Actor, &Permission) -> Result<bool, PredicateError> + Send + Sync,
{
    fn has_permission(&self, actor: &Actor, permission: &Permission) -> Result<bool, PredicateError> {
        self(actor, permission)
    }
}

/// Evaluates against the actor's own granted permissions; `*` grants all.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrantSetPredicate;

impl PermissionPredicate for GrantSetPredicate {
    fn has_permission(&self, actor: &Actor, permission: &Permission) -> Result<bool, PredicateError> {
        let grants = actor.granted_permissions();
        Ok(actor.has_wildcard() || grants.contains(permission))
    }
}

/// Which permission keys can open a tenant-scoped module.
///
/// `Exact` consults only the module's declared key. `LegacyFallback` also
/// accepts the older naming schemes, tried in order: `manage_<module>`,
/// `<module>:read`, then bare `read`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionConvention {
    #[default]
    Exact,
    LegacyFallback,
}

impl PermissionConvention {
    /// Keys to try, in order, for a module whose declared key is `declared`.
    pub fn candidates(&self, module: &str, declared: &Permission) -> Vec<Permission> {
        match self {
            PermissionConvention::Exact => vec![declared.clone()],
            PermissionConvention::LegacyFallback => {
                let mut keys = vec![
                    declared.clone(),
                    Permission::new(format!("manage_{module}")),
                    Permission::new(format!("{module}:read")),
                    Permission::new("read"),
                ];
                let mut seen = std::collections::HashSet::new();
                keys.retain(|k| seen.insert(k.clone()));
                keys
            }
        }
    }
}

impl core::str::FromStr for PermissionConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "legacy_fallback" | "legacy-fallback" => Ok(Self::LegacyFallback),
            other => Err(format!("unknown permission convention '{other}'")),
        }
    }
}
