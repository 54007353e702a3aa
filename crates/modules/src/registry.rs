//! Module registry: registration, classification lookup and dependency-ordered
//! initialization.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{ClassificationTable, ModuleClassification, ModuleDescriptor, ModuleName, RegistryError};

pub type SetupResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A module's one-time setup routine.
pub type ModuleSetup = Arc<dyn Fn() -> SetupResult + Send + Sync>;

/// A module that could not be initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitFailure {
    pub name: ModuleName,
    #[serde(serialize_with = "serialize_error")]
    pub error: RegistryError,
}

fn serialize_error<S: serde::Serializer>(err: &RegistryError, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&err.to_string())
}

/// Outcome of [`ModuleRegistry::initialize_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitSummary {
    /// Modules initialized during this pass, in completion order.
    pub succeeded: Vec<ModuleName>,
    /// Modules that were already initialized before this pass.
    pub skipped: Vec<ModuleName>,
    pub failed: Vec<InitFailure>,
}

impl InitSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct RegistryState {
    descriptors: BTreeMap<ModuleName, ModuleDescriptor>,
    registration_order: Vec<ModuleName>,
    setups: HashMap<ModuleName, ModuleSetup>,
    initialized: HashSet<ModuleName>,
    completion_order: Vec<ModuleName>,
    initialization_started: bool,
    generation: u64,
}

/// Registry of capability modules.
///
/// Constructed explicitly by the application's composition point; there is
/// no process-wide instance. Descriptors are read-mostly after startup.
///
/// # Invariants
/// - A module's classification always agrees with the [`ClassificationTable`].
/// - A module's setup runs at most once successfully, and only after all of
///   its dependencies completed.
/// - Dependency cycles are reported, never looped on.
pub struct ModuleRegistry {
    table: ClassificationTable,
    state: RwLock<RegistryState>,
}

impl core::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("table", &self.table)
            .field("modules", &self.registered_names())
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new(table: ClassificationTable) -> Self {
        Self {
            table,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Build a registry whose classification table is derived from the given
    /// descriptors, and register them all.
    pub fn from_descriptors(descriptors: Vec<ModuleDescriptor>) -> Result<Self, RegistryError> {
        let table = ClassificationTable::from_descriptors(&descriptors)?;
        let registry = Self::new(table);
        for d in descriptors {
            registry.register(d)?;
        }
        Ok(registry)
    }

    pub fn table(&self) -> &ClassificationTable {
        &self.table
    }

    /// Register a module. Idempotent by name: the last write wins.
    pub fn register(&self, descriptor: ModuleDescriptor) -> Result<(), RegistryError> {
        self.register_inner(descriptor, None)
    }

    /// Register a module together with its one-time setup routine.
    pub fn register_with_setup<F>(
        &self,
        descriptor: ModuleDescriptor,
        setup: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> SetupResult + Send + Sync + 'static,
    {
        self.register_inner(descriptor, Some(Arc::new(setup)))
    }

    fn register_inner(
        &self,
        descriptor: ModuleDescriptor,
        setup: Option<ModuleSetup>,
    ) -> Result<(), RegistryError> {
        descriptor.validate()?;

        match self.table.classify(descriptor.name.as_str()) {
            None => return Err(RegistryError::Unclassified(descriptor.name.clone())),
            Some(configured) if configured != descriptor.classification => {
                return Err(RegistryError::ClassificationMismatch {
                    module: descriptor.name.clone(),
                    declared: descriptor.classification,
                    configured,
                });
            }
            Some(_) => {}
        }

        let mut state = self.state.write().map_err(|_| RegistryError::Poisoned)?;
        let name = descriptor.name.clone();

        if state.initialization_started {
            warn!(module = %name, "module registered after initialization began");
        }

        if state.descriptors.insert(name.clone(), descriptor).is_some() {
            warn!(module = %name, "module descriptor overwritten");
        } else {
            state.registration_order.push(name.clone());
        }

        match setup {
            Some(setup) => {
                state.setups.insert(name.clone(), setup);
            }
            None => {
                state.setups.remove(&name);
            }
        }

        state.generation += 1;
        debug!(module = %name, "module registered");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ModuleDescriptor> {
        self.state.read().ok()?.descriptors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state
            .read()
            .map(|s| s.descriptors.contains_key(name))
            .unwrap_or(false)
    }

    /// All registered descriptors, in registration order.
    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        state
            .registration_order
            .iter()
            .filter_map(|n| state.descriptors.get(n).cloned())
            .collect()
    }

    pub fn registered_names(&self) -> Vec<ModuleName> {
        self.state
            .read()
            .map(|s| s.registration_order.clone())
            .unwrap_or_default()
    }

    /// Monotonic counter bumped on every registration. Consumers that derive
    /// data from the registry compare it to detect staleness.
    pub fn generation(&self) -> u64 {
        self.state.read().map(|s| s.generation).unwrap_or(u64::MAX)
    }

    pub fn classification(&self, name: &str) -> Option<ModuleClassification> {
        self.table.classify(name)
    }

    pub fn is_operator_only(&self, name: &str) -> bool {
        self.table.is_operator_only(name)
    }

    pub fn is_tenant_scoped(&self, name: &str) -> bool {
        self.table.is_tenant_scoped(name)
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.state
            .read()
            .map(|s| s.initialized.contains(name))
            .unwrap_or(false)
    }

    /// Modules in the order their setup completed.
    pub fn initialization_order(&self) -> Vec<ModuleName> {
        self.state
            .read()
            .map(|s| s.completion_order.clone())
            .unwrap_or_default()
    }

    /// Dependency-first ordering of every registered module, without running
    /// any setup.
    pub fn topological_order(&self) -> Result<Vec<ModuleName>, RegistryError> {
        let state = self.state.read().map_err(|_| RegistryError::Poisoned)?;
        let mut order = Vec::with_capacity(state.descriptors.len());
        let mut done: HashSet<ModuleName> = HashSet::new();
        let mut stack: Vec<ModuleName> = Vec::new();

        fn visit(
            name: &ModuleName,
            descriptors: &BTreeMap<ModuleName, ModuleDescriptor>,
            done: &mut HashSet<ModuleName>,
            stack: &mut Vec<ModuleName>,
            order: &mut Vec<ModuleName>,
        ) -> Result<(), RegistryError> {
            if done.contains(name) {
                return Ok(());
            }
            if let Some(path) = cycle_path(stack, name) {
                return Err(RegistryError::DependencyCycle { path });
            }
            let descriptor = descriptors
                .get(name)
                .ok_or_else(|| RegistryError::UnknownModule(name.clone()))?;
            stack.push(name.clone());
            for dep in &descriptor.dependencies {
                visit(dep, descriptors, done, stack, order)?;
            }
            stack.pop();
            done.insert(name.clone());
            order.push(name.clone());
            Ok(())
        }

        for name in &state.registration_order {
            visit(name, &state.descriptors, &mut done, &mut stack, &mut order)?;
        }
        Ok(order)
    }

    /// Initialize one module, initializing its dependencies first.
    pub fn initialize(&self, name: &str) -> Result<(), RegistryError> {
        self.mark_initialization_started()?;
        let mut failed = HashMap::new();
        self.initialize_inner(&ModuleName::new(name.to_string()), &mut Vec::new(), &mut failed)
    }

    /// Initialize every registered module, isolating failures per module.
    pub fn initialize_all(&self) -> InitSummary {
        let mut summary = InitSummary::default();

        if let Err(err) = self.mark_initialization_started() {
            error!(error = %err, "module initialization aborted");
            return summary;
        }

        let names = self.registered_names();
        let completed_before = self.initialization_order().len();
        let mut failed: HashMap<ModuleName, RegistryError> = HashMap::new();

        for name in &names {
            if self.is_initialized(name.as_str()) {
                summary.skipped.push(name.clone());
                continue;
            }
            if let Err(err) = self.initialize_inner(name, &mut Vec::new(), &mut failed) {
                error!(module = %name, error = %err, "module initialization failed");
                summary.failed.push(InitFailure {
                    name: name.clone(),
                    error: err,
                });
            }
        }

        summary.succeeded = self
            .initialization_order()
            .into_iter()
            .skip(completed_before)
            .collect();
        summary.skipped.retain(|n| !summary.succeeded.contains(n));

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "module initialization finished"
        );
        summary
    }

    fn mark_initialization_started(&self) -> Result<(), RegistryError> {
        let mut state = self.state.write().map_err(|_| RegistryError::Poisoned)?;
        state.initialization_started = true;
        Ok(())
    }

    fn initialize_inner(
        &self,
        name: &ModuleName,
        stack: &mut Vec<ModuleName>,
        failed: &mut HashMap<ModuleName, RegistryError>,
    ) -> Result<(), RegistryError> {
        if self.is_initialized(name.as_str()) {
            return Ok(());
        }
        if let Some(err) = failed.get(name) {
            return Err(err.clone());
        }
        if let Some(path) = cycle_path(stack, name) {
            return Err(RegistryError::DependencyCycle { path });
        }

        let (dependencies, setup) = {
            let state = self.state.read().map_err(|_| RegistryError::Poisoned)?;
            let descriptor = state
                .descriptors
                .get(name)
                .ok_or_else(|| RegistryError::UnknownModule(name.clone()))?;
            (descriptor.dependencies.clone(), state.setups.get(name).cloned())
        };

        stack.push(name.clone());
        for dep in &dependencies {
            if let Err(err) = self.initialize_inner(dep, stack, failed) {
                stack.pop();
                let err = match err {
                    RegistryError::DependencyCycle { .. } | RegistryError::Poisoned => err,
                    other => RegistryError::DependencyFailed {
                        module: name.clone(),
                        dependency: dep.clone(),
                        reason: other.to_string(),
                    },
                };
                failed.insert(name.clone(), err.clone());
                return Err(err);
            }
        }
        stack.pop();

        // Setup runs outside the registry lock so it may query the registry.
        if let Some(setup) = setup {
            if let Err(e) = setup() {
                let err = RegistryError::SetupFailed {
                    module: name.clone(),
                    message: e.to_string(),
                };
                failed.insert(name.clone(), err.clone());
                return Err(err);
            }
        }

        let mut state = self.state.write().map_err(|_| RegistryError::Poisoned)?;
        if state.initialized.insert(name.clone()) {
            state.completion_order.push(name.clone());
            debug!(module = %name, "module initialized");
        }
        Ok(())
    }
}

fn cycle_path(stack: &[ModuleName], name: &ModuleName) -> Option<Vec<ModuleName>> {
    let start = stack.iter().position(|n| n == name)?;
    let mut path: Vec<ModuleName> = stack[start..].to_vec();
    path.push(name.clone());
    Some(path)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tenantgate_core::Permission;

    use super::*;

    fn table(operator: &[&'static str], tenant: &[&'static str]) -> ClassificationTable {
        ClassificationTable::new(
            operator.iter().map(|n| ModuleName::from(*n)),
            tenant.iter().map(|n| ModuleName::from(*n)),
        )
        .unwrap()
    }

    fn recording_setup(
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl Fn() -> SetupResult + Send + Sync + 'static {
        let log = Arc::clone(log);
        move || {
            log.lock().unwrap().push(name);
            Ok(())
        }
    }

    #[test]
    fn dependencies_initialize_first() {
        let registry = ModuleRegistry::new(table(&[], &["a", "b", "c"]));
        let log = Arc::new(Mutex::new(Vec::new()));

        registry
            .register_with_setup(
                ModuleDescriptor::tenant_scoped("a", None).with_dependency("b"),
                recording_setup(&log, "a"),
            )
            .unwrap();
        registry
            .register_with_setup(
                ModuleDescriptor::tenant_scoped("b", None).with_dependency("c"),
                recording_setup(&log, "b"),
            )
            .unwrap();
        registry
            .register_with_setup(
                ModuleDescriptor::tenant_scoped("c", None),
                recording_setup(&log, "c"),
            )
            .unwrap();

        let summary = registry.initialize_all();

        assert!(summary.is_complete());
        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
        assert_eq!(
            summary.succeeded,
            vec![ModuleName::from("c"), ModuleName::from("b"), ModuleName::from("a")]
        );
    }

    #[test]
    fn cycle_is_reported_without_hanging() {
        let registry = ModuleRegistry::new(table(&[], &["a", "b"]));
        registry
            .register(ModuleDescriptor::tenant_scoped("a", None).with_dependency("b"))
            .unwrap();
        registry
            .register(ModuleDescriptor::tenant_scoped("b", None).with_dependency("a"))
            .unwrap();

        let err = registry.initialize("a").unwrap_err();
        assert_eq!(
            err,
            RegistryError::DependencyCycle {
                path: vec!["a".into(), "b".into(), "a".into()]
            }
        );

        let summary = registry.initialize_all();
        assert_eq!(summary.failed.len(), 2);
        assert!(
            summary
                .failed
                .iter()
                .all(|f| matches!(f.error, RegistryError::DependencyCycle { .. }))
        );
        assert!(matches!(
            registry.topological_order(),
            Err(RegistryError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let registry = ModuleRegistry::new(table(&["ops"], &[]));
        registry
            .register(ModuleDescriptor::operator_only("ops").with_dependency("ops"))
            .unwrap();
        assert!(matches!(
            registry.initialize("ops"),
            Err(RegistryError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn setup_runs_exactly_once() {
        let registry = ModuleRegistry::new(table(&[], &["billing", "core"]));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry
            .register_with_setup(ModuleDescriptor::tenant_scoped("core", None), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        registry
            .register(ModuleDescriptor::tenant_scoped("billing", None).with_dependency("core"))
            .unwrap();

        registry.initialize("billing").unwrap();
        registry.initialize("core").unwrap();
        let summary = registry.initialize_all();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(summary.succeeded.is_empty());
        assert_eq!(summary.skipped.len(), 2);
    }

    #[test]
    fn one_failure_does_not_abort_the_others() {
        let registry = ModuleRegistry::new(table(&["audit"], &["billing", "reports", "crm"]));
        registry
            .register_with_setup(ModuleDescriptor::tenant_scoped("billing", None), || {
                Err("database unreachable".into())
            })
            .unwrap();
        registry
            .register(ModuleDescriptor::tenant_scoped("reports", None).with_dependency("billing"))
            .unwrap();
        registry.register(ModuleDescriptor::tenant_scoped("crm", None)).unwrap();
        registry.register(ModuleDescriptor::operator_only("audit")).unwrap();

        let summary = registry.initialize_all();

        assert_eq!(
            summary.succeeded,
            vec![ModuleName::from("crm"), ModuleName::from("audit")]
        );
        assert_eq!(summary.failed.len(), 2);
        assert!(matches!(
            &summary.failed[0].error,
            RegistryError::SetupFailed { message, .. } if message.contains("unreachable")
        ));
        assert!(matches!(
            &summary.failed[1].error,
            RegistryError::DependencyFailed { dependency, .. } if dependency.as_str() == "billing"
        ));
        assert!(!registry.is_initialized("reports"));
    }

    #[test]
    fn missing_dependency_fails_that_module_only() {
        let registry = ModuleRegistry::new(table(&[], &["crm", "orphan"]));
        registry
            .register(ModuleDescriptor::tenant_scoped("orphan", None).with_dependency("ghost"))
            .unwrap();
        registry.register(ModuleDescriptor::tenant_scoped("crm", None)).unwrap();

        let summary = registry.initialize_all();
        assert_eq!(summary.succeeded, vec![ModuleName::from("crm")]);
        assert_eq!(summary.failed[0].name.as_str(), "orphan");
    }

    #[test]
    fn registration_is_validated_against_the_table() {
        let registry = ModuleRegistry::new(table(&["tenants"], &["billing"]));

        let err = registry
            .register(ModuleDescriptor::tenant_scoped("tenants", None))
            .unwrap_err();
        assert!(matches!(err, RegistryError::ClassificationMismatch { .. }));

        let err = registry
            .register(ModuleDescriptor::tenant_scoped("payroll", None))
            .unwrap_err();
        assert_eq!(err, RegistryError::Unclassified("payroll".into()));
        assert!(!registry.contains("payroll"));
    }

    #[test]
    fn overwrite_keeps_single_entry_and_last_write_wins() {
        let registry = ModuleRegistry::new(table(&[], &["billing"]));
        registry.register(ModuleDescriptor::tenant_scoped("billing", None)).unwrap();
        let generation = registry.generation();
        registry
            .register(ModuleDescriptor::tenant_scoped(
                "billing",
                Some(Permission::new("billing:read")),
            ))
            .unwrap();

        assert_eq!(registry.registered_names().len(), 1);
        assert_eq!(
            registry.get("billing").unwrap().permission_key,
            Some(Permission::new("billing:read"))
        );
        assert!(registry.generation() > generation);
    }

    #[test]
    fn topological_order_is_dependency_first() {
        let registry = ModuleRegistry::new(table(&[], &["a", "b", "c"]));
        registry
            .register(ModuleDescriptor::tenant_scoped("a", None).with_dependency("c"))
            .unwrap();
        registry.register(ModuleDescriptor::tenant_scoped("b", None)).unwrap();
        registry.register(ModuleDescriptor::tenant_scoped("c", None)).unwrap();

        let expected: Vec<ModuleName> = vec!["c".into(), "a".into(), "b".into()];
        assert_eq!(registry.topological_order().unwrap(), expected);
        assert!(registry.initialization_order().is_empty());
    }
}
