//! Service configuration loaded from TOML.
//!
//! Every section is optional; missing keys take the statutory defaults.
//!
//! ```
//! use nurse_scheduling::config::AppConfig;
//!
//! let config = AppConfig::from_toml_str(r#"
//!     [rules]
//!     emergency_rest_exception = false
//!
//!     [optimizer]
//!     command = ["python3", "solver/schedule_optimizer.py"]
//!     timeout_secs = 10
//! "#).unwrap();
//!
//! assert!(!config.rules.emergency_rest_exception);
//! assert_eq!(config.rules.min_rest_hours, 11);
//! assert_eq!(config.optimizer.timeout_secs, 10);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "NURSE_SCHEDULING_CONFIG";

/// Configuration file used when the environment variable is unset.
pub const DEFAULT_CONFIG_FILE: &str = "nurse-scheduling.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rules: RulesConfig,
    pub ranking: RankingConfig,
    pub optimizer: OptimizerConfig,
}

impl AppConfig {
    /// Loads from `NURSE_SCHEDULING_CONFIG`, else `nurse-scheduling.toml`,
    /// else defaults. A file that exists but fails to parse is an error.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        if Path::new(&path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rules = &self.rules;
        if rules.emergency_rest_hours > rules.min_rest_hours {
            return Err(ConfigError::Invalid(format!(
                "emergency_rest_hours ({}) exceeds min_rest_hours ({})",
                rules.emergency_rest_hours, rules.min_rest_hours
            )));
        }
        if rules.rest_window_days == 0 || rules.max_days_per_window > rules.rest_window_days {
            return Err(ConfigError::Invalid(format!(
                "max_days_per_window ({}) must fit in rest_window_days ({})",
                rules.max_days_per_window, rules.rest_window_days
            )));
        }
        if rules.max_shift_hours <= 0 {
            return Err(ConfigError::Invalid("max_shift_hours must be positive".into()));
        }
        if self.optimizer.command.is_empty() {
            return Err(ConfigError::Invalid("optimizer.command is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7860,
            static_dir: "static".to_string(),
        }
    }
}

/// Labor-rule limits used by the validator and interval checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Statutory rest between two shifts.
    pub min_rest_hours: i64,
    /// Floor of the emergency exception band.
    pub emergency_rest_hours: i64,
    /// Gaps in `[emergency_rest_hours, min_rest_hours)` warn instead of failing.
    pub emergency_rest_exception: bool,
    pub rest_window_days: u32,
    pub max_days_per_window: u32,
    pub max_consecutive_days: u32,
    pub max_shift_hours: i64,
    /// Minimum distance between shift starts on adjacent days.
    pub min_start_spacing_hours: i64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            min_rest_hours: 11,
            emergency_rest_hours: 8,
            emergency_rest_exception: true,
            rest_window_days: 7,
            max_days_per_window: 5,
            max_consecutive_days: 6,
            max_shift_hours: 12,
            min_start_spacing_hours: 24,
        }
    }
}

/// Candidate priority weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub base: i64,
    pub per_day_penalty: i64,
    pub below_target_bonus: i64,
    pub below_minimum_bonus: i64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            base: 1000,
            per_day_penalty: 10,
            below_target_bonus: 100,
            below_minimum_bonus: 200,
        }
    }
}

/// When a failed external solve may be retried with the heuristic engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    Never,
    #[default]
    OnInfeasible,
    Always,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Program and arguments; the request is written to its stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub fallback: FallbackPolicy,
    pub avoid_flower_pattern: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "uv".to_string(),
                "run".to_string(),
                "solver/schedule_optimizer.py".to_string(),
            ],
            timeout_secs: 60,
            fallback: FallbackPolicy::OnInfeasible,
            avoid_flower_pattern: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.ranking.base, 1000);
        assert_eq!(config.optimizer.fallback, FallbackPolicy::OnInfeasible);
    }

    #[test]
    fn test_fallback_policy_names() {
        let config = AppConfig::from_toml_str("[optimizer]\nfallback = \"never\"").unwrap();
        assert_eq!(config.optimizer.fallback, FallbackPolicy::Never);
    }

    #[test]
    fn test_rejects_inverted_rest_band() {
        let err = AppConfig::from_toml_str("[rules]\nemergency_rest_hours = 12").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_unknown_type() {
        let err = AppConfig::from_toml_str("[server]\nport = \"eighty\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AppConfig::load("/nonexistent/nurse-scheduling.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
