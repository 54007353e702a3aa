use std::time::Duration;

use crate::error::SessionError;
use crate::machine::IdlePolicy;

pub const DEFAULT_STORAGE_KEY: &str = "tenantgate.session";

/// Timing and storage settings consumed by the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub warning_lead_time: Duration,
    /// Period of the idle display tick. Display only.
    pub idle_sample_interval: Duration,
    /// How long before hard expiry the proactive refresh fires.
    pub refresh_lead_time: Duration,
    pub logout_settle_delay: Duration,
    pub storage_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(1800),
            warning_lead_time: Duration::from_secs(300),
            idle_sample_interval: Duration::from_secs(1),
            refresh_lead_time: Duration::from_secs(60),
            logout_settle_delay: Duration::from_millis(100),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        self.idle_policy()?;
        if self.idle_sample_interval.is_zero() {
            return Err(SessionError::InvalidConfig(
                "idle sample interval must be positive".into(),
            ));
        }
        if self.storage_key.trim().is_empty() {
            return Err(SessionError::InvalidConfig("storage key is empty".into()));
        }
        Ok(())
    }

    pub fn idle_policy(&self) -> Result<IdlePolicy, SessionError> {
        IdlePolicy::new(self.idle_timeout, self.warning_lead_time)
            .map_err(|e| SessionError::InvalidConfig(e.to_string()))
    }
}
