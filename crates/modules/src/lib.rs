//! `tenantgate-modules`: registry of capability modules.
//!
//! Tracks which modules exist, how they are classified (operator-only or
//! tenant-scoped), which permission key gates them, and runs each module's
//! setup exactly once after its dependencies.

pub mod descriptor;
pub mod error;
pub mod registry;

pub use descriptor::{ClassificationTable, ModuleClassification, ModuleDescriptor, ModuleName};
pub use error::RegistryError;
pub use registry::{InitFailure, InitSummary, ModuleRegistry, ModuleSetup, SetupResult};
