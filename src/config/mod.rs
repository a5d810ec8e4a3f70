//! Configuration module for Kumo Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

use crate::upload::retry::BackoffStrategy;
use crate::upload::UploadPolicy;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let var_name = cap.get(1).map(|m| m.as_str()).unwrap_or_default();

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub delete: DeleteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.bucket must not be empty".into(),
            ));
        }

        if self.storage.region.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.region must not be empty".into(),
            ));
        }

        if let Some(ref endpoint) = self.storage.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid storage endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        let upload = &self.upload;
        if upload.max_size == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_size must be greater than zero".into(),
            ));
        }
        if upload.max_part_size == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_part_size must be greater than zero".into(),
            ));
        }
        if upload.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_retries must be at least 1".into(),
            ));
        }
        if upload.allowed_types.is_empty() {
            return Err(ConfigError::ValidationError(
                "upload.allowed_types must list at least one content type".into(),
            ));
        }

        match upload.backoff.strategy.as_str() {
            "none" | "fixed" | "exponential" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid backoff strategy '{}': must be 'none', 'fixed', or 'exponential'",
                    other
                )))
            }
        }

        if self.delete.poll_interval_millis == 0 {
            return Err(ConfigError::ValidationError(
                "delete.poll_interval_millis must be greater than zero".into(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level '{}'",
                    other
                )))
            }
        }

        Ok(())
    }

    /// Build the upload policy described by the `upload` section
    pub fn upload_policy(&self) -> UploadPolicy {
        self.upload.to_policy()
    }
}

/// Object storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Per-operation timeout applied to every backend call
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Upload policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    /// Attempts per part, including the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_part_size")]
    pub max_part_size: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl UploadConfig {
    pub(crate) fn to_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_size: self.max_size,
            allowed_types: self.allowed_types.clone(),
            max_retries: self.max_retries,
            max_part_size: self.max_part_size,
            backoff: self.backoff.to_strategy(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            allowed_types: default_allowed_types(),
            max_retries: default_max_retries(),
            max_part_size: default_max_part_size(),
            backoff: BackoffConfig::default(),
        }
    }
}

fn default_max_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_allowed_types() -> Vec<String> {
    vec!["image/jpeg".into(), "image/png".into()]
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_part_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

/// Retry backoff configuration
///
/// # Example
///
/// ```yaml
/// backoff:
///   strategy: "exponential"
///   base_delay_ms: 100
///   max_delay_ms: 2000
///   jitter: true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// "none", "fixed" or "exponential". Default: "none"
    #[serde(default = "default_backoff_strategy")]
    pub strategy: String,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter: bool,
}

impl BackoffConfig {
    fn to_strategy(&self) -> BackoffStrategy {
        let base = Duration::from_millis(self.base_delay_ms);
        match self.strategy.as_str() {
            "fixed" => BackoffStrategy::Fixed(base),
            "exponential" => BackoffStrategy::Exponential {
                base,
                max: Duration::from_millis(self.max_delay_ms),
                jitter: self.jitter,
            },
            _ => BackoffStrategy::None,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: default_backoff_strategy(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: false,
        }
    }
}

fn default_backoff_strategy() -> String {
    "none".to_string()
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}

/// Delete confirmation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteConfig {
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_seconds: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_millis: u64,
}

impl DeleteConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            wait_timeout_seconds: default_wait_timeout(),
            poll_interval_millis: default_poll_interval(),
        }
    }
}

fn default_wait_timeout() -> u64 {
    20
}

fn default_poll_interval() -> u64 {
    500
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level used when RUST_LOG is not set. Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}
