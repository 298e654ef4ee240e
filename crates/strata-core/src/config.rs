//! Strata configuration module.
//!
//! Provides configuration file support via `strata.toml`, environment
//! variables, and runtime overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (API)
//! 2. Environment variables (`STRATA_*`)
//! 3. Configuration file (`strata.toml`)
//! 4. Default values

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::region::EvictionPolicy;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration file.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Defaults applied to entity regions at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionDefaults {
    /// Maximum entries per region before eviction.
    pub capacity: usize,
    /// Victim selection policy on overflow.
    pub eviction_policy: EvictionPolicy,
    /// Entry time-to-live in seconds (`None` = entries never age out).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl Default for RegionDefaults {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            eviction_policy: EvictionPolicy::Lru,
            ttl_secs: None,
        }
    }
}

/// Soft-lock configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Milliseconds before a pending write lock is forcibly cleared.
    pub lock_timeout_ms: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 60_000,
        }
    }
}

/// Query cache configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Whether query results are cached at all.
    pub enabled: bool,
    /// Maximum cached query entries.
    pub capacity: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 2_048,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
    /// Log format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Main Strata configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Region defaults.
    pub regions: RegionDefaults,
    /// Soft-lock settings.
    pub locking: LockingConfig,
    /// Query cache settings.
    pub query: QuerySettings,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl CacheConfig {
    /// Loads configuration from default sources.
    ///
    /// Priority: defaults < file < environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("strata.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STRATA_").split("_").lowercase(false));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Creates a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.regions.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "regions.capacity".to_string(),
                message: "capacity must be at least 1".to_string(),
            });
        }

        if self.query.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "query.capacity".to_string(),
                message: "capacity must be at least 1".to_string(),
            });
        }

        if !(1..=86_400_000).contains(&self.locking.lock_timeout_ms) {
            return Err(ConfigError::InvalidValue {
                key: "locking.lock_timeout_ms".to_string(),
                message: format!(
                    "value {} is out of range [1, 86400000]",
                    self.locking.lock_timeout_ms
                ),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        Ok(())
    }

    /// Soft-lock timeout as a duration.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.locking.lock_timeout_ms)
    }

    /// Region entry TTL as a duration, if configured.
    #[must_use]
    pub fn region_ttl(&self) -> Option<Duration> {
        self.regions.ttl_secs.map(Duration::from_secs)
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}
