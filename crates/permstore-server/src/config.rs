//! Configuration management for the permission repository.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use permstore_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("permstore.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use permstore_storage::{BackoffStrategy, RetryPolicy};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "PERMSTORE";

/// Repository configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Store settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Per-operation timeouts
    #[serde(default)]
    pub repository: RepositorySettings,

    /// Read retry policy
    #[serde(default)]
    pub retry: RetrySettings,

    /// Unrestricted permission cache
    #[serde(default)]
    pub unrestricted_cache: UnrestrictedCacheSettings,

    /// Bulk query fan-out
    #[serde(default)]
    pub bulk: BulkSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Store backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Store backend type. Only "memory" ships with this crate.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Key prefix shared by every key the repository writes.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Maximum concurrent store operations
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            prefix: default_prefix(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_prefix() -> String {
    "spinnaker:fiat".to_string()
}

fn default_pool_size() -> usize {
    16
}

/// Timeouts for repository reads.
///
/// - `PERMSTORE_REPOSITORY__GET_PERMISSION_TIMEOUT_MS` bounds a whole `get`
/// - `PERMSTORE_REPOSITORY__CHECK_LAST_MODIFIED_TIMEOUT_MS` bounds the
///   unrestricted marker read
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RepositorySettings {
    #[serde(default = "default_get_permission_timeout")]
    pub get_permission_timeout_ms: u64,

    #[serde(default = "default_check_last_modified_timeout")]
    pub check_last_modified_timeout_ms: u64,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            get_permission_timeout_ms: default_get_permission_timeout(),
            check_last_modified_timeout_ms: default_check_last_modified_timeout(),
        }
    }
}

impl RepositorySettings {
    pub fn get_permission_timeout(&self) -> Duration {
        Duration::from_millis(self.get_permission_timeout_ms)
    }

    pub fn check_last_modified_timeout(&self) -> Duration {
        Duration::from_millis(self.check_last_modified_timeout_ms)
    }
}

fn default_get_permission_timeout() -> u64 {
    1000
}

fn default_check_last_modified_timeout() -> u64 {
    50
}

/// Retry policy for store reads.
///
/// # Example YAML Configuration
///
/// ```yaml
/// retry:
///   max_retries: 2
///   initial_delay_ms: 10
///   max_delay_ms: 100
///   strategy: exponential
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// "fixed", "linear" or "exponential"
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            strategy: BackoffStrategy::default(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_strategy(self.strategy)
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_delay() -> u64 {
    10
}

fn default_max_delay() -> u64 {
    100
}

/// Unrestricted permission cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UnrestrictedCacheSettings {
    /// Entries expire this long after their last access.
    #[serde(default = "default_expire_after_access")]
    pub expire_after_access_secs: u64,

    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

impl Default for UnrestrictedCacheSettings {
    fn default() -> Self {
        Self {
            expire_after_access_secs: default_expire_after_access(),
            max_capacity: default_max_capacity(),
        }
    }
}

impl UnrestrictedCacheSettings {
    pub fn expire_after_access(&self) -> Duration {
        Duration::from_secs(self.expire_after_access_secs)
    }
}

fn default_expire_after_access() -> u64 {
    10
}

fn default_max_capacity() -> u64 {
    16
}

/// Bulk query settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BulkSettings {
    /// Concurrent per-role and per-user fetches in bulk queries
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_concurrency() -> usize {
    8
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
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

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

fn invalid(message: impl Into<String>) -> ConfigLoadError {
    ConfigLoadError::Invalid {
        message: message.into(),
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `PERMSTORE_` and use `__` as
    /// separator. For example:
    /// - `PERMSTORE_STORAGE__PREFIX=fiat` overrides `storage.prefix`
    /// - `PERMSTORE_BULK__MAX_CONCURRENCY=4` overrides `bulk.max_concurrency`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let valid_backends = ["memory"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(invalid(format!(
                "storage.backend must be one of: {:?}, got: {}",
                valid_backends, self.storage.backend
            )));
        }

        if self.storage.prefix.trim().is_empty() {
            return Err(invalid("storage.prefix must not be empty"));
        }

        if self.storage.pool_size == 0 {
            return Err(invalid("storage.pool_size must be greater than 0"));
        }

        if self.repository.get_permission_timeout_ms == 0 {
            return Err(invalid(
                "repository.get_permission_timeout_ms must be greater than 0",
            ));
        }

        if self.repository.check_last_modified_timeout_ms == 0 {
            return Err(invalid(
                "repository.check_last_modified_timeout_ms must be greater than 0",
            ));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(invalid(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms",
            ));
        }

        if self.unrestricted_cache.max_capacity == 0 {
            return Err(invalid(
                "unrestricted_cache.max_capacity must be greater than 0",
            ));
        }

        if self.unrestricted_cache.expire_after_access_secs == 0 {
            return Err(invalid(
                "unrestricted_cache.expire_after_access_secs must be greater than 0",
            ));
        }

        if self.bulk.max_concurrency == 0 {
            return Err(invalid("bulk.max_concurrency must be greater than 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "logging.level must be one of: {:?}, got: {}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}

// PERMSTORE_STORAGE__PREFIX -> storage.prefix
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
