//! Environment-driven configuration for the Coordination Core.
//!
//! Loaded once at startup into an immutable [`CoreConfig`] and passed down
//! explicitly — no process-wide globals.
//!
//! The Core recognizes exactly two environment variables:
//! `FLEET_DATA_DIR` and `FLEET_LOG_LEVEL`. Every other tunable named below
//! (heartbeat threshold, default lock TTL, sweep interval, case-folding
//! policy) is a Core-owned default, not something an operator can override
//! from the environment; [`CoreConfig::with_overrides`] exists only for
//! tests that need a tighter sweep interval or TTL than production uses.

use std::path::PathBuf;
use std::time::Duration;

use fleet_model::CasePolicy;

/// `FLEET_LOG_LEVEL` values the Core recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => anyhow::bail!(
                "FLEET_LOG_LEVEL={other:?} is not one of debug, info, warn, error"
            ),
        }
    }
}

/// Immutable, fully-resolved configuration for one Core process.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root of `.flightline/` — `state.db`, `checkpoints/`, `logs/` live
    /// under here.
    pub data_dir: PathBuf,
    pub log_level: LogLevel,
    /// How long a specialist may go without a heartbeat before it's stale.
    pub heartbeat_threshold: Duration,
    /// Default `timeout_ms` applied to `Acquire` when the caller omits one.
    pub default_lock_ttl: Duration,
    /// Interval on which the Lock Manager's expiry sweeper ticks.
    pub sweep_interval: Duration,
    /// Path case-folding policy, decided once at startup and recorded in
    /// `core_metadata`.
    pub case_policy: CasePolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".flightline"),
            log_level: LogLevel::Info,
            heartbeat_threshold: Duration::from_secs(120),
            default_lock_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(5),
            case_policy: default_case_policy(),
        }
    }
}

#[cfg(target_os = "linux")]
fn default_case_policy() -> CasePolicy {
    CasePolicy::Sensitive
}

#[cfg(not(target_os = "linux"))]
fn default_case_policy() -> CasePolicy {
    CasePolicy::InsensitiveAscii
}

impl CoreConfig {
    /// Resolve configuration from the process environment plus Core
    /// defaults. Only `FLEET_DATA_DIR` and `FLEET_LOG_LEVEL` are read
    /// — everything else uses [`CoreConfig::default`].
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = CoreConfig::default();

        if let Ok(dir) = std::env::var("FLEET_DATA_DIR") {
            if dir.trim().is_empty() {
                anyhow::bail!("FLEET_DATA_DIR is set but empty");
            }
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(level) = std::env::var("FLEET_LOG_LEVEL") {
            config.log_level = level.parse()?;
        }

        Ok(config)
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Build a config rooted at an isolated directory with tighter timings,
    /// for tests only (production never overrides the sweep interval or
    /// lock TTL — see the module doc above).
    pub fn with_overrides(
        data_dir: PathBuf,
        sweep_interval: Duration,
        default_lock_ttl: Duration,
    ) -> Self {
        Self {
            data_dir,
            sweep_interval,
            default_lock_ttl,
            ..CoreConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_dotflightline() {
        let config = CoreConfig::default();
        assert_eq!(config.data_dir, PathBuf::from(".flightline"));
        assert_eq!(config.state_db_path(), PathBuf::from(".flightline/state.db"));
    }

    #[test]
    fn log_level_parses_recognized_values() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
