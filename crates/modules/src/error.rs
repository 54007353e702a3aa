use thiserror::Error;

use crate::ModuleName;

/// Registry failure.
///
/// Initialization errors are fatal to the module they name only; the
/// registry keeps going for unaffected modules.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown module '{0}'")]
    UnknownModule(ModuleName),

    #[error("dependency cycle: {}", format_path(.path))]
    DependencyCycle { path: Vec<ModuleName> },

    #[error("module '{module}' not initialized: dependency '{dependency}' failed ({reason})")]
    DependencyFailed {
        module: ModuleName,
        dependency: ModuleName,
        reason: String,
    },

    #[error("setup of module '{module}' failed: {message}")]
    SetupFailed { module: ModuleName, message: String },

    #[error("module '{module}' declared as {declared} but classified as {configured}")]
    ClassificationMismatch {
        module: ModuleName,
        declared: crate::ModuleClassification,
        configured: crate::ModuleClassification,
    },

    #[error("module '{0}' is not present in the classification table")]
    Unclassified(ModuleName),

    #[error("module '{0}' is classified as both operator-only and tenant-scoped")]
    AmbiguousClassification(ModuleName),

    #[error("invalid module descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("registry state poisoned")]
    Poisoned,
}

fn format_path(path: &[ModuleName]) -> String {
    path.iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
