//! Access-control engine.
//!
//! Answers "may this actor reach this module" under the two-tier isolation
//! rule: operators live exclusively in operator-only modules, tenant actors
//! exclusively in tenant-scoped modules gated by permission grants.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, error};

use tenantgate_core::{ActorId, Clock, Permission, SystemClock, TenantId};
use tenantgate_modules::{ModuleClassification, ModuleDescriptor, ModuleRegistry};

use crate::{AccessDecision, Actor, PermissionConvention, PermissionPredicate, ReasonCode};

/// Result of evaluating the rule chain, with the inputs it consulted.
struct Evaluation {
    decision: AccessDecision,
    classification: Option<ModuleClassification>,
    checked: Vec<Permission>,
}

struct CachedActor {
    fingerprint: u64,
    registry_generation: u64,
    decisions: HashMap<String, AccessDecision>,
}

/// Memoized decisions, keyed by actor id and guarded by the actor's
/// fingerprint so a changed scope or grant set never reuses old decisions.
#[derive(Default)]
struct DecisionCache {
    entries: Mutex<HashMap<ActorId, CachedActor>>,
}

impl DecisionCache {
    fn get(&self, actor: &Actor, generation: u64, module: &str) -> Option<AccessDecision> {
        let mut entries = self.entries.lock().ok()?;
        let entry = entries.get(&actor.id())?;
        if entry.fingerprint != actor.fingerprint() || entry.registry_generation != generation {
            entries.remove(&actor.id());
            return None;
        }
        entry.decisions.get(module).copied()
    }

    fn put(&self, actor: &Actor, generation: u64, module: &str, decision: AccessDecision) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let fingerprint = actor.fingerprint();
        let entry = entries.entry(actor.id()).or_insert_with(|| CachedActor {
            fingerprint,
            registry_generation: generation,
            decisions: HashMap::new(),
        });
        if entry.fingerprint != fingerprint || entry.registry_generation != generation {
            entry.fingerprint = fingerprint;
            entry.registry_generation = generation;
            entry.decisions.clear();
        }
        entry.decisions.insert(module.to_string(), decision);
    }

    fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|e| e.values().map(|a| a.decisions.len()).sum())
            .unwrap_or(0)
    }
}

/// Detailed, serializable account of one access decision.
#[derive(Debug, Clone, Serialize)]
pub struct AccessExplanation {
    pub module: String,
    pub decision: AccessDecision,
    pub classification: Option<ModuleClassification>,
    /// Permission keys handed to the predicate, in evaluation order.
    pub permissions_checked: Vec<String>,
    pub actor: Option<ActorState>,
    pub message: String,
}

/// Snapshot of the actor as the engine saw it.
#[derive(Debug, Clone, Serialize)]
pub struct ActorState {
    pub actor_id: ActorId,
    pub tenant_id: Option<TenantId>,
    pub is_operator: bool,
    pub role: String,
    pub granted_permissions: Vec<String>,
    pub has_wildcard: bool,
}

impl From<&Actor> for ActorState {
    fn from(actor: &Actor) -> Self {
        Self {
            actor_id: actor.id(),
            tenant_id: actor.tenant_id(),
            is_operator: actor.is_operator(),
            role: actor.role().to_string(),
            granted_permissions: actor
                .granted_permissions()
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            has_wildcard: actor.has_wildcard(),
        }
    }
}

/// Access-control engine over a [`ModuleRegistry`] and a permission authority.
///
/// - No IO
/// - Never panics on predicate failure
/// - Never turns an error into an allow
pub struct AccessControlEngine {
    registry: Arc<ModuleRegistry>,
    predicate: Arc<dyn PermissionPredicate>,
    convention: PermissionConvention,
    clock: Arc<dyn Clock>,
    cache: Option<DecisionCache>,
}

impl AccessControlEngine {
    pub fn new(registry: Arc<ModuleRegistry>, predicate: Arc<dyn PermissionPredicate>) -> Self {
        Self {
            registry,
            predicate,
            convention: PermissionConvention::default(),
            clock: Arc::new(SystemClock),
            cache: None,
        }
    }

    pub fn with_convention(mut self, convention: PermissionConvention) -> Self {
        self.convention = convention;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Memoize decisions per actor. Cached decisions are dropped whenever the
    /// actor's fingerprint or the registry changes, and on [`Self::invalidate_all`].
    pub fn with_decision_cache(mut self) -> Self {
        self.cache = Some(DecisionCache::default());
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn convention(&self) -> PermissionConvention {
        self.convention
    }

    /// Drop every memoized decision.
    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn cached_decisions(&self) -> usize {
        self.cache.as_ref().map(DecisionCache::len).unwrap_or(0)
    }

    /// Decide whether `actor` may reach `module`.
    pub fn can_access(&self, actor: Option<&Actor>, module: &str) -> AccessDecision {
        let (Some(actor), Some(cache)) = (actor, &self.cache) else {
            return self.evaluate(actor, module).decision;
        };

        let generation = self.registry.generation();
        if let Some(decision) = cache.get(actor, generation, module) {
            return decision;
        }

        let decision = self.evaluate(Some(actor), module).decision;
        if decision.reason != ReasonCode::EvaluationError {
            cache.put(actor, generation, module, decision);
        }
        decision
    }

    /// Every registered module `actor` may reach, in registration order.
    ///
    /// For an operator this is exactly the reachable operator-only subset;
    /// for a tenant actor a subset of the tenant-scoped modules.
    pub fn list_accessible_modules(&self, actor: Option<&Actor>) -> Vec<ModuleDescriptor> {
        if actor.is_none() {
            return Vec::new();
        }
        self.registry
            .descriptors()
            .into_iter()
            .filter(|d| self.can_access(actor, d.name.as_str()).allowed)
            .collect()
    }

    /// Explain a decision (always evaluated fresh, never from cache).
    pub fn explain(&self, actor: Option<&Actor>, module: &str) -> AccessExplanation {
        let eval = self.evaluate(actor, module);
        let message = match (actor, eval.decision.allowed) {
            (None, _) => "no authenticated actor; every module is denied".to_string(),
            (Some(a), true) => format!(
                "actor {} may access '{}': {}",
                a.id(),
                module,
                eval.decision.reason
            ),
            (Some(a), false) => format!(
                "actor {} denied '{}': {}",
                a.id(),
                module,
                eval.decision.reason
            ),
        };

        AccessExplanation {
            module: module.to_string(),
            decision: eval.decision,
            classification: eval.classification,
            permissions_checked: eval
                .checked
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            actor: actor.map(ActorState::from),
            message,
        }
    }

    /// The rule chain. First match wins.
    fn evaluate(&self, actor: Option<&Actor>, module: &str) -> Evaluation {
        let now = self.clock.now();
        let descriptor = self.registry.get(module);
        let classification = descriptor.as_ref().map(|d| d.classification);
        let mut checked = Vec::new();

        let decision = match (actor, &descriptor) {
            (None, _) => AccessDecision::deny(ReasonCode::Unauthenticated, now),

            (Some(a), Some(d)) if a.is_operator() => match d.classification {
                ModuleClassification::OperatorOnly => {
                    AccessDecision::allow(ReasonCode::OperatorModule, now)
                }
                ModuleClassification::TenantScoped => {
                    debug!(actor_id = %a.id(), module, "operator denied tenant-scoped module");
                    AccessDecision::deny(ReasonCode::OperatorIsolation, now)
                }
            },
            (Some(a), None) if a.is_operator() => {
                AccessDecision::deny(ReasonCode::UnknownModule, now)
            }

            (Some(a), Some(d)) => match d.classification {
                ModuleClassification::OperatorOnly => {
                    debug!(actor_id = %a.id(), module, "tenant actor denied operator-only module");
                    AccessDecision::deny(ReasonCode::TenantIsolation, now)
                }
                ModuleClassification::TenantScoped => match &d.permission_key {
                    None => AccessDecision::deny(ReasonCode::NoPermissionMapping, now),
                    Some(key) => {
                        let reason = self.check_permissions(a, module, key, &mut checked);
                        match reason {
                            ReasonCode::PermissionGranted => AccessDecision::allow(reason, now),
                            _ => AccessDecision::deny(reason, now),
                        }
                    }
                },
            },

            (Some(_), None) => AccessDecision::deny(ReasonCode::UnknownModule, now),
        };

        Evaluation {
            decision,
            classification,
            checked,
        }
    }

    fn check_permissions(
        &self,
        actor: &Actor,
        module: &str,
        declared: &Permission,
        checked: &mut Vec<Permission>,
    ) -> ReasonCode {
        for key in self.convention.candidates(module, declared) {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                self.predicate.has_permission(actor, &key)
            }));
            checked.push(key.clone());

            match outcome {
                Ok(Ok(true)) => return ReasonCode::PermissionGranted,
                Ok(Ok(false)) => continue,
                Ok(Err(e)) => {
                    error!(actor_id = %actor.id(), module, permission = %key, error = %e, "permission evaluation failed");
                    return ReasonCode::EvaluationError;
                }
                Err(_) => {
                    error!(actor_id = %actor.id(), module, permission = %key, "permission predicate panicked");
                    return ReasonCode::EvaluationError;
                }
            }
        }
        ReasonCode::InsufficientPermission
    }
}
