use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash, Hasher};

use serde::{Deserialize, Serialize};

use tenantgate_core::{ActorId, Permission, TenantId};

use crate::Role;

/// Which side of the platform/tenant boundary an actor lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorScope {
    Operator,
    Tenant,
}

/// An authenticated identity as seen by the access-control engine.
///
/// # Invariants
/// - An operator never carries a tenant id. Raw parts that set the operator
///   flag together with a tenant describe a tenant-scoped actor.
/// - Every non-operator actor is tenant-scoped (possibly without an assigned
///   tenant, in which case only permission grants decide).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ActorRecord", into = "ActorRecord")]
pub struct Actor {
    id: ActorId,
    tenant_id: Option<TenantId>,
    is_operator: bool,
    role: Role,
    granted_permissions: BTreeSet<Permission>,
}

/// Unvalidated wire/storage form of [`Actor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRecord {
    pub id: ActorId,
    pub tenant_id: Option<TenantId>,
    pub is_operator: bool,
    pub role: Role,
    #[serde(default)]
    pub granted_permissions: BTreeSet<Permission>,
}

impl Actor {
    /// A platform operator (no tenant).
    pub fn operator(id: ActorId, role: impl Into<Role>) -> Self {
        Self {
            id,
            tenant_id: None,
            is_operator: true,
            role: role.into(),
            granted_permissions: BTreeSet::new(),
        }
    }

    /// A tenant-scoped actor.
    pub fn tenant(id: ActorId, tenant_id: TenantId, role: impl Into<Role>) -> Self {
        Self {
            id,
            tenant_id: Some(tenant_id),
            is_operator: false,
            role: role.into(),
            granted_permissions: BTreeSet::new(),
        }
    }

    /// Build an actor from raw parts. Only `is_operator` without a tenant
    /// yields an operator; a tenant id always makes the actor tenant-scoped.
    pub fn from_parts(
        id: ActorId,
        tenant_id: Option<TenantId>,
        is_operator: bool,
        role: Role,
        granted_permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        if is_operator && tenant_id.is_some() {
            tracing::debug!(actor_id = %id, "operator flag with a tenant; treating actor as tenant-scoped");
        }
        Self {
            id,
            tenant_id,
            is_operator: is_operator && tenant_id.is_none(),
            role,
            granted_permissions: granted_permissions.into_iter().collect(),
        }
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        self.granted_permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_operator(&self) -> bool {
        self.is_operator
    }

    pub fn scope(&self) -> ActorScope {
        if self.is_operator {
            ActorScope::Operator
        } else {
            ActorScope::Tenant
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn granted_permissions(&self) -> &BTreeSet<Permission> {
        &self.granted_permissions
    }

    pub fn has_wildcard(&self) -> bool {
        self.granted_permissions.iter().any(Permission::is_wildcard)
    }

    /// Digest of everything an access decision may depend on. Two actors with
    /// the same id but a different fingerprint must not share decisions.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.id.hash(&mut hasher);
        self.tenant_id.hash(&mut hasher);
        self.is_operator.hash(&mut hasher);
        self.role.hash(&mut hasher);
        self.granted_permissions.hash(&mut hasher);
        hasher.finish()
    }
}

impl From<ActorRecord> for Actor {
    fn from(r: ActorRecord) -> Self {
        Actor::from_parts(r.id, r.tenant_id, r.is_operator, r.role, r.granted_permissions)
    }
}

impl From<Actor> for ActorRecord {
    fn from(a: Actor) -> Self {
        Self {
            id: a.id,
            tenant_id: a.tenant_id,
            is_operator: a.is_operator,
            role: a.role,
            granted_permissions: a.granted_permissions,
        }
    }
}
