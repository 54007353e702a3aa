//! Shell configuration loaded from the environment.

use std::env;
use std::time::Duration;

use tenantgate_auth::PermissionConvention;
use tenantgate_observability::LogFormat;
use tenantgate_session::SessionConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub idle_timeout: Duration,
    pub warning_lead_time: Duration,
    pub idle_sample_interval: Duration,
    pub refresh_lead_time: Duration,
    pub logout_settle_delay: Duration,
    pub session_storage_key: String,
    pub permission_convention: PermissionConvention,
    pub log_format: LogFormat,
}

impl Default for ShellConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            idle_timeout: session.idle_timeout,
            warning_lead_time: session.warning_lead_time,
            idle_sample_interval: session.idle_sample_interval,
            refresh_lead_time: session.refresh_lead_time,
            logout_settle_delay: session.logout_settle_delay,
            session_storage_key: session.storage_key,
            permission_convention: PermissionConvention::Exact,
            log_format: LogFormat::Json,
        }
    }
}

impl ShellConfig {
    /// Read `TENANTGATE_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Self::from_env`] over an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let idle_timeout = Duration::from_secs(read_u64_with_default(
            &lookup,
            "TENANTGATE_IDLE_TIMEOUT_SECONDS",
            defaults.idle_timeout.as_secs(),
        )?);
        let warning_lead_time = Duration::from_secs(read_u64_with_default(
            &lookup,
            "TENANTGATE_WARNING_LEAD_SECONDS",
            defaults.warning_lead_time.as_secs(),
        )?);
        let idle_sample_interval = Duration::from_millis(read_u64_with_default(
            &lookup,
            "TENANTGATE_IDLE_SAMPLE_MS",
            defaults.idle_sample_interval.as_millis() as u64,
        )?);
        let refresh_lead_time = Duration::from_secs(read_u64_with_default(
            &lookup,
            "TENANTGATE_REFRESH_LEAD_SECONDS",
            defaults.refresh_lead_time.as_secs(),
        )?);
        let logout_settle_delay = Duration::from_millis(read_u64_with_default(
            &lookup,
            "TENANTGATE_LOGOUT_SETTLE_MS",
            defaults.logout_settle_delay.as_millis() as u64,
        )?);
        let session_storage_key = match lookup("TENANTGATE_SESSION_KEY") {
            // set but blank is a misconfiguration, not a request for the default
            Some(v) if v.trim().is_empty() => {
                return Err(ConfigError::Missing("TENANTGATE_SESSION_KEY".to_string()));
            }
            Some(v) => v,
            None => defaults.session_storage_key,
        };
        let permission_convention =
            read_parsed_with_default(&lookup, "TENANTGATE_PERMISSION_CONVENTION", defaults.permission_convention)?;
        let log_format = read_parsed_with_default(&lookup, "TENANTGATE_LOG_FORMAT", defaults.log_format)?;

        if warning_lead_time >= idle_timeout {
            return Err(ConfigError::Invalid(
                "TENANTGATE_WARNING_LEAD_SECONDS".to_string(),
                format!(
                    "{} (must be shorter than the idle timeout of {}s)",
                    warning_lead_time.as_secs(),
                    idle_timeout.as_secs()
                ),
            ));
        }
        if idle_sample_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "TENANTGATE_IDLE_SAMPLE_MS".to_string(),
                "0".to_string(),
            ));
        }

        Ok(Self {
            idle_timeout,
            warning_lead_time,
            idle_sample_interval,
            refresh_lead_time,
            logout_settle_delay,
            session_storage_key,
            permission_convention,
            log_format,
        })
    }

    /// The subset consumed by the session controller.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: self.idle_timeout,
            warning_lead_time: self.warning_lead_time,
            idle_sample_interval: self.idle_sample_interval,
            refresh_lead_time: self.refresh_lead_time,
            logout_settle_delay: self.logout_settle_delay,
            storage_key: self.session_storage_key.clone(),
        }
    }
}

fn read_u64_with_default<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_parsed_with_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}
