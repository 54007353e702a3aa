use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use tenantgate_core::Permission;

use crate::RegistryError;

/// Module name (registry key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleName(Cow<'static, str>);

impl ModuleName {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ModuleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ModuleName {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl core::borrow::Borrow<str> for ModuleName {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

/// Which side of the operator/tenant boundary a module lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleClassification {
    OperatorOnly,
    TenantScoped,
}

impl core::fmt::Display for ModuleClassification {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ModuleClassification::OperatorOnly => f.write_str("operator-only"),
            ModuleClassification::TenantScoped => f.write_str("tenant-scoped"),
        }
    }
}

/// A registered capability module. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: ModuleName,
    pub dependencies: Vec<ModuleName>,
    pub classification: ModuleClassification,
    /// Permission gating tenant access. `None` means no tenant actor may
    /// reach the module.
    pub permission_key: Option<Permission>,
}

impl ModuleDescriptor {
    pub fn operator_only(name: impl Into<ModuleName>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            classification: ModuleClassification::OperatorOnly,
            permission_key: None,
        }
    }

    pub fn tenant_scoped(name: impl Into<ModuleName>, permission_key: Option<Permission>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            classification: ModuleClassification::TenantScoped,
            permission_key,
        }
    }

    pub fn with_dependency(mut self, dependency: impl Into<ModuleName>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_permission(mut self, permission_key: Permission) -> Self {
        self.permission_key = Some(permission_key);
        self
    }

    pub fn is_operator_only(&self) -> bool {
        self.classification == ModuleClassification::OperatorOnly
    }

    pub fn is_tenant_scoped(&self) -> bool {
        self.classification == ModuleClassification::TenantScoped
    }

    pub(crate) fn validate(&self) -> Result<(), RegistryError> {
        if self.name.as_str().trim().is_empty() {
            return Err(RegistryError::InvalidDescriptor(
                "module name cannot be empty".to_string(),
            ));
        }
        if let Some(key) = &self.permission_key {
            if key.as_str().trim().is_empty() {
                return Err(RegistryError::InvalidDescriptor(format!(
                    "module '{}' declares an empty permission key",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// The two fixed name-sets that decide which side of the boundary a module
/// belongs to. Configured once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationTable {
    operator_only: BTreeSet<ModuleName>,
    tenant_scoped: BTreeSet<ModuleName>,
}

impl ClassificationTable {
    /// Build a table from the two name-sets. A name may appear in at most one.
    pub fn new<O, T>(operator_only: O, tenant_scoped: T) -> Result<Self, RegistryError>
    where
        O: IntoIterator<Item = ModuleName>,
        T: IntoIterator<Item = ModuleName>,
    {
        let operator_only: BTreeSet<ModuleName> = operator_only.into_iter().collect();
        let tenant_scoped: BTreeSet<ModuleName> = tenant_scoped.into_iter().collect();

        if let Some(name) = operator_only.intersection(&tenant_scoped).next() {
            return Err(RegistryError::AmbiguousClassification(name.clone()));
        }

        Ok(Self {
            operator_only,
            tenant_scoped,
        })
    }

    /// Derive the table from a static descriptor list (the single source of
    /// truth for module classification).
    pub fn from_descriptors<'a, I>(descriptors: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = &'a ModuleDescriptor>,
    {
        let mut operator_only = Vec::new();
        let mut tenant_scoped = Vec::new();
        for d in descriptors {
            match d.classification {
                ModuleClassification::OperatorOnly => operator_only.push(d.name.clone()),
                ModuleClassification::TenantScoped => tenant_scoped.push(d.name.clone()),
            }
        }
        Self::new(operator_only, tenant_scoped)
    }

    pub fn classify(&self, name: &str) -> Option<ModuleClassification> {
        if self.operator_only.contains(name) {
            Some(ModuleClassification::OperatorOnly)
        } else if self.tenant_scoped.contains(name) {
            Some(ModuleClassification::TenantScoped)
        } else {
            None
        }
    }

    pub fn is_operator_only(&self, name: &str) -> bool {
        self.operator_only.contains(name)
    }

    pub fn is_tenant_scoped(&self, name: &str) -> bool {
        self.tenant_scoped.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_sets_are_rejected() {
        let err = ClassificationTable::new(
            vec![ModuleName::from("tenants")],
            vec![ModuleName::from("tenants"), ModuleName::from("billing")],
        )
        .unwrap_err();
        assert_eq!(err, RegistryError::AmbiguousClassification("tenants".into()));
    }

    #[test]
    fn unknown_names_are_neither() {
        let table = ClassificationTable::new(
            vec![ModuleName::from("tenants")],
            vec![ModuleName::from("billing")],
        )
        .unwrap();
        assert_eq!(table.classify("tenants"), Some(ModuleClassification::OperatorOnly));
        assert_eq!(table.classify("billing"), Some(ModuleClassification::TenantScoped));
        assert_eq!(table.classify("payroll"), None);
        assert!(!table.is_operator_only("payroll"));
        assert!(!table.is_tenant_scoped("payroll"));
    }

    #[test]
    fn empty_permission_key_is_invalid() {
        let d = ModuleDescriptor::tenant_scoped("billing", Some(Permission::new(" ")));
        assert!(matches!(d.validate(), Err(RegistryError::InvalidDescriptor(_))));
    }
}
