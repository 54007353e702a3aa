//! Process-wide tracing setup.

/// Log subscriber configuration.
pub mod tracing;

pub use crate::tracing::LogFormat;

/// Install the default subscriber: JSON lines, `RUST_LOG` filter, `info`
/// when unset.
///
/// Safe to call repeatedly; only the first call installs anything.
pub fn init() -> bool {
    crate::tracing::init(LogFormat::Json, "info")
}
