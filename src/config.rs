//! Orchestrator configuration.
//!
//! Settings that apply to every workflow run regardless of dataset: where
//! ledger snapshots and attempt logs live, default stage timeouts, how long a
//! stage gets to shut down after an interrupt, and an optional YAML workflow
//! declaration that replaces the built-in pipeline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default directory for ledger snapshots and attempt logs.
pub const DEFAULT_STATE_DIR: &str = "./.rigforge";

/// Default grace period between SIGINT and SIGKILL when stopping a stage.
pub const DEFAULT_KILL_GRACE_SECS: u64 = 5;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the workflow orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory holding `runs/` ledger snapshots and `logs/` attempt logs.
    pub state_dir: PathBuf,
    /// Timeout applied to stages that declare none.
    pub default_timeout: Option<Duration>,
    /// Time a terminated stage gets between SIGINT and SIGKILL.
    pub kill_grace: Duration,
    /// Root of the toolkit's calibration files.
    pub calibration_dir: PathBuf,
    /// YAML workflow declaration replacing the built-in pipeline.
    pub workflow_file: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            default_timeout: None,
            kill_grace: Duration::from_secs(DEFAULT_KILL_GRACE_SECS),
            calibration_dir: default_calibration_dir(),
            workflow_file: None,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RIGFORGE_STATE_DIR`: ledger and log directory (default: ./.rigforge)
    /// - `RIGFORGE_STAGE_TIMEOUT_SECS`: default stage timeout (default: none)
    /// - `RIGFORGE_KILL_GRACE_SECS`: SIGINT to SIGKILL grace period (default: 5)
    /// - `RIGFORGE_CALIBRATION_DIR`: calibration root (default: `HF_LEROBOT_CALIBRATION`
    ///   or ~/.cache/huggingface/lerobot/calibration)
    /// - `RIGFORGE_WORKFLOW`: YAML workflow declaration (default: built-in pipeline)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RIGFORGE_STATE_DIR") {
            config.state_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("RIGFORGE_STAGE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "RIGFORGE_STAGE_TIMEOUT_SECS")?;
            config.default_timeout = Some(Duration::from_secs(secs));
        }

        if let Ok(val) = std::env::var("RIGFORGE_KILL_GRACE_SECS") {
            let secs: u64 = parse_env_value(&val, "RIGFORGE_KILL_GRACE_SECS")?;
            config.kill_grace = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("RIGFORGE_CALIBRATION_DIR") {
            config.calibration_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("RIGFORGE_WORKFLOW") {
            if !val.trim().is_empty() {
                config.workflow_file = Some(PathBuf::from(val));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the state directory.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Sets the default stage timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Sets the kill grace period.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Sets the calibration directory.
    pub fn with_calibration_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.calibration_dir = dir.into();
        self
    }

    /// Sets the workflow declaration file.
    pub fn with_workflow_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.workflow_file = Some(path.into());
        self
    }

    /// Directory holding ledger snapshots.
    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir.join("runs")
    }

    /// Directory holding attempt logs.
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "state_dir must not be empty".to_string(),
            ));
        }

        if let Some(timeout) = self.default_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::ValidationFailed(
                    "default_timeout must be greater than 0".to_string(),
                ));
            }
        }

        if self.kill_grace > Duration::from_secs(300) {
            return Err(ConfigError::ValidationFailed(
                "kill_grace must not exceed 300 seconds".to_string(),
            ));
        }

        Ok(())
    }
}

/// Calibration root used by the toolkit when nothing is configured.
fn default_calibration_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HF_LEROBOT_CALIBRATION") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".cache")
        .join("huggingface")
        .join("lerobot")
        .join("calibration")
}

fn parse_env_value<T: std::str::FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::new();
        assert_eq!(config.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
        assert_eq!(config.kill_grace, Duration::from_secs(DEFAULT_KILL_GRACE_SECS));
        assert!(config.default_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = OrchestratorConfig::new()
            .with_state_dir("/tmp/rig")
            .with_default_timeout(Duration::from_secs(90))
            .with_kill_grace(Duration::from_secs(1))
            .with_workflow_file("workflow.yaml");

        assert_eq!(config.runs_dir(), PathBuf::from("/tmp/rig/runs"));
        assert_eq!(config.logs_dir(), PathBuf::from("/tmp/rig/logs"));
        assert_eq!(config.default_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.workflow_file, Some(PathBuf::from("workflow.yaml")));
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let config = OrchestratorConfig::new().with_default_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_parse_env_value() {
        let parsed: u64 = parse_env_value(" 42 ", "KEY").unwrap();
        assert_eq!(parsed, 42);

        let err = parse_env_value::<u64>("soon", "KEY").unwrap_err();
        assert!(err.to_string().contains("KEY"));
    }
}
