//! Runtime settings for logging and rollouts.
//!
//! Settings are loaded from JSON, then environment overrides are applied,
//! then [`DeployflowConfig::validate`] runs before anything uses them.

use crate::errors::{ConfigurationError, DeployflowError};
use crate::rollout::DeploymentStrategy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the log filter.
pub const ENV_LOG_LEVEL: &str = "DEPLOYFLOW_LOG_LEVEL";
/// Environment variable switching JSON log output on or off.
pub const ENV_LOG_JSON: &str = "DEPLOYFLOW_LOG_JSON";
/// Environment variable overriding the per-target delivery timeout.
pub const ENV_DELIVERY_TIMEOUT: &str = "DEPLOYFLOW_DELIVERY_TIMEOUT_SECS";

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployflowConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Rollout settings.
    #[serde(default)]
    pub rollout: RolloutSettings,
}

/// Logging settings consumed by [`crate::observability::init_tracing`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// An `EnvFilter` directive such as `info` or `deployflow=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Rollout settings consumed by the deployment coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutSettings {
    /// Upper bound on one target's delivery, in seconds.
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_seconds: f64,
    /// Upper bound on one target's agent check, in seconds.
    #[serde(default = "default_agent_check_timeout")]
    pub agent_check_timeout_seconds: f64,
    /// Strategy used by deployment groups that do not set their own.
    #[serde(default)]
    pub default_strategy: DeploymentStrategy,
}

fn default_delivery_timeout() -> f64 {
    600.0
}

fn default_agent_check_timeout() -> f64 {
    30.0
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            delivery_timeout_seconds: default_delivery_timeout(),
            agent_check_timeout_seconds: default_agent_check_timeout(),
            default_strategy: DeploymentStrategy::default(),
        }
    }
}

impl RolloutSettings {
    /// Gets the delivery timeout as a Duration.
    #[must_use]
    pub fn delivery_timeout(&self) -> Duration {
        seconds_to_duration(self.delivery_timeout_seconds)
    }

    /// Gets the agent check timeout as a Duration.
    #[must_use]
    pub fn agent_check_timeout(&self) -> Duration {
        seconds_to_duration(self.agent_check_timeout_seconds)
    }
}

/// Settings built in code skip `validate`, so this never panics: values
/// that are not positive map to zero and values too large for a
/// `Duration` saturate.
fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

impl DeployflowConfig {
    /// Creates settings with every default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses settings from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, DeployflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DeployflowError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self, DeployflowError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup function.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, DeployflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(json) = lookup(ENV_LOG_JSON) {
            self.logging.json = matches!(json.trim(), "1" | "true" | "yes");
        }
        if let Some(raw) = lookup(ENV_DELIVERY_TIMEOUT) {
            self.rollout.delivery_timeout_seconds = raw.trim().parse().map_err(|_| {
                ConfigurationError::new(format!("{ENV_DELIVERY_TIMEOUT} is not a number"))
                    .with_context_entry("value", raw.clone())
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validates the settings.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.logging.level.trim().is_empty() {
            return Err(ConfigurationError::new("logging.level cannot be empty"));
        }
        for (field, value) in [
            ("rollout.delivery_timeout_seconds", self.rollout.delivery_timeout_seconds),
            ("rollout.agent_check_timeout_seconds", self.rollout.agent_check_timeout_seconds),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigurationError::new(format!("{field} must be positive"))
                    .with_context_entry("value", value.to_string()));
            }
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(ConfigurationError::new(format!("{field} is out of range"))
                    .with_context_entry("value", value.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DeployflowConfig::new();
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert_eq!(config.rollout.delivery_timeout(), Duration::from_secs(600));
        assert_eq!(config.rollout.default_strategy, DeploymentStrategy::OneAtATime);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = DeployflowConfig::from_json_str(
            r#"{"rollout": {"delivery_timeout_seconds": 5, "default_strategy": "all_at_once"}}"#,
        )
        .unwrap();
        assert_eq!(config.rollout.delivery_timeout_seconds, 5.0);
        assert_eq!(config.rollout.agent_check_timeout_seconds, 30.0);
        assert_eq!(config.rollout.default_strategy, DeploymentStrategy::AllAtOnce);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = DeployflowConfig::from_json_str(r#"{"rollout": {"delivery_timeout_seconds": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, DeployflowError::Configuration(_)));
    }

    #[test]
    fn test_rejects_out_of_range_timeout() {
        let err = DeployflowConfig::from_json_str(
            r#"{"rollout": {"delivery_timeout_seconds": 1e20}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let result = DeployflowConfig::new().apply_overrides(|key| {
            (key == ENV_DELIVERY_TIMEOUT).then(|| "1e300".to_string())
        });
        assert!(matches!(result, Err(DeployflowError::Configuration(_))));
    }

    #[test]
    fn test_unvalidated_timeouts_do_not_panic() {
        let settings = RolloutSettings {
            delivery_timeout_seconds: 1e20,
            agent_check_timeout_seconds: f64::NAN,
            ..RolloutSettings::default()
        };
        assert_eq!(settings.delivery_timeout(), Duration::MAX);
        assert_eq!(settings.agent_check_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"logging": {{"level": "debug", "json": true}}}}"#).unwrap();

        let config = DeployflowConfig::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_LOG_LEVEL, "deployflow=trace"),
            (ENV_LOG_JSON, "true"),
            (ENV_DELIVERY_TIMEOUT, "12.5"),
        ]
        .into_iter()
        .collect();

        let config = DeployflowConfig::new()
            .apply_overrides(|key| env.get(key).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.logging.level, "deployflow=trace");
        assert!(config.logging.json);
        assert_eq!(config.rollout.delivery_timeout_seconds, 12.5);
    }

    #[test]
    fn test_bad_override() {
        let result = DeployflowConfig::new().apply_overrides(|key| {
            (key == ENV_DELIVERY_TIMEOUT).then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }
}
