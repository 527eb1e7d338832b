//! Orchestrator configuration.
//!
//! Loaded from a JSON file, then overridden by `GANTRY_*` environment
//! variables. Every field has a default, so an empty object is a valid file.

use crate::errors::ConfigError;
use crate::executor::SchedulerOptions;
use crate::promotion::PromotionPolicy;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_concurrency() -> usize {
    4
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".gantry/artifacts")
}

fn default_run_dir() -> PathBuf {
    PathBuf::from(".gantry/runs")
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_cancel_grace_ms() -> u64 {
    5000
}

fn default_store_retry() -> RetryConfig {
    RetryConfig::new().with_max_attempts(3).with_base_delay_ms(100)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GantryConfig {
    /// Maximum concurrently running jobs.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Timeout for jobs that do not declare one, in seconds.
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
    /// Step retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Artifact store retry policy.
    #[serde(default = "default_store_retry")]
    pub store_retry: RetryConfig,
    /// Filesystem artifact store root.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Run history root.
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,
    /// Directory steps run in.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Grace period for running jobs after cancellation, in milliseconds.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Promotion policy.
    #[serde(default)]
    pub promotion: PromotionPolicy,
    /// Logging.
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for GantryConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            default_timeout_secs: None,
            retry: RetryConfig::default(),
            store_retry: default_store_retry(),
            artifact_dir: default_artifact_dir(),
            run_dir: default_run_dir(),
            workspace_root: default_workspace_root(),
            cancel_grace_ms: default_cancel_grace_ms(),
            promotion: PromotionPolicy::default(),
            log: LogConfig::default(),
        }
    }
}

impl GantryConfig {
    /// Loads a config file and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or an
    /// override has an invalid value.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from defaults and the environment only.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for malformed overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `GANTRY_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for malformed values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    ///
    /// Recognized keys: `GANTRY_CONCURRENCY`, `GANTRY_DEFAULT_TIMEOUT_SECS`,
    /// `GANTRY_MAX_ATTEMPTS`, `GANTRY_ARTIFACT_DIR`, `GANTRY_RUN_DIR`,
    /// `GANTRY_WORKSPACE`, `GANTRY_CANCEL_GRACE_MS`, `GANTRY_LOG_LEVEL`,
    /// `GANTRY_LOG_JSON`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for malformed values.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GANTRY_CONCURRENCY") {
            self.concurrency = parse("GANTRY_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("GANTRY_DEFAULT_TIMEOUT_SECS") {
            self.default_timeout_secs = Some(parse("GANTRY_DEFAULT_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("GANTRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse("GANTRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("GANTRY_ARTIFACT_DIR") {
            self.artifact_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("GANTRY_RUN_DIR") {
            self.run_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("GANTRY_WORKSPACE") {
            self.workspace_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("GANTRY_CANCEL_GRACE_MS") {
            self.cancel_grace_ms = parse("GANTRY_CANCEL_GRACE_MS", &v)?;
        }
        if let Some(v) = lookup("GANTRY_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = lookup("GANTRY_LOG_JSON") {
            self.log.json = parse("GANTRY_LOG_JSON", &v)?;
        }
        Ok(())
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(invalid("concurrency", "0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "0"));
        }
        if self.store_retry.max_attempts == 0 {
            return Err(invalid("store_retry.max_attempts", "0"));
        }
        if self.default_timeout_secs == Some(0) {
            return Err(invalid("default_timeout_secs", "0"));
        }
        if self.promotion.tag_regex().is_err() {
            return Err(invalid("promotion.tag_pattern", &self.promotion.tag_pattern));
        }
        Ok(())
    }

    /// Returns scheduler options derived from this config.
    #[must_use]
    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            concurrency: self.concurrency,
            retry: self.retry.clone(),
            store_retry: self.store_retry.clone(),
            default_timeout: self.default_timeout_secs.map(Duration::from_secs),
            workspace_root: self.workspace_root.clone(),
            cancel_grace: Duration::from_millis(self.cancel_grace_ms),
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
