//! `tenantgate-shell`: the composition point.
//!
//! Builds the registry, access-control engine, session controller and audit
//! tracker from one [`ShellConfig`] and exposes the surface the rest of the
//! application consumes.

pub mod config;
pub mod shell;

pub use config::{ConfigError, ShellConfig};
pub use shell::{AppShell, AppShellBuilder};

/// Install the process-wide subscriber in the configured format.
pub fn init_logging(config: &ShellConfig) -> bool {
    tenantgate_observability::tracing::init(config.log_format, "info")
}
