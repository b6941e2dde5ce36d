//! Configuration for the toolkit infrastructure.
//!
//! Only the knobs consumed by the pipelines and caches live here; how the
//! values are loaded (files, env, CLI) is up to the embedding application.
//!
//! # Example
//!
//! ```
//! use querykit::QuerykitConfig;
//!
//! // Minimal config (uses defaults)
//! let config = QuerykitConfig::default();
//! assert_eq!(config.metrics_buffer_size, 1000);
//! assert_eq!(config.log_buffer_size, 5000);
//! assert_eq!(config.log_retention_days, 30);
//!
//! // Custom config
//! let config = QuerykitConfig {
//!     log_dir: "/var/log/app".into(),
//!     log_rotation_enabled: true,
//!     slow_query_ms: 250,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::logging::Level;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid log level '{0}' (expected debug|info|warn|error)")]
    InvalidLevel(String),
    #[error("invalid value for '{field}': {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Configuration for [`crate::Instrumentation`].
///
/// All fields have defaults; zero or negative sizes fall back to the default
/// when the config is normalized.
#[derive(Debug, Clone, Deserialize)]
pub struct QuerykitConfig {
    /// Alias used to tell databases apart in metric snapshots
    #[serde(default = "default_db_name")]
    pub db_name: String,

    /// Directory that holds the log files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Log file base name (`{base}.log` or `{base}_{YYYY-MM-DD}.log`)
    #[serde(default = "default_log_base_name")]
    pub log_base_name: String,

    /// Minimum level written to the log file (debug|info|warn|error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log pipeline channel capacity
    #[serde(default = "default_log_buffer_size")]
    pub log_buffer_size: usize,

    /// Switch files on date change and run the retention sweep
    #[serde(default)]
    pub log_rotation_enabled: bool,

    /// Days a rotated log file is kept
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,

    /// How often the retention sweep runs
    #[serde(default = "default_log_sweep_interval_secs")]
    pub log_sweep_interval_secs: u64,

    /// Metrics ring buffer capacity (<= 0 means default)
    #[serde(default = "default_metrics_buffer_size")]
    pub metrics_buffer_size: i64,

    /// Queries slower than this are counted and logged as slow
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_ms: u64,

    /// LRU tier capacity per cache shard
    #[serde(default = "default_cache_lru_capacity")]
    pub cache_lru_capacity: usize,

    /// Start the pool statistics collector on startup
    #[serde(default)]
    pub enable_pool_stats: bool,

    /// Pool statistics refresh interval (values below 1s become 60s)
    #[serde(default = "default_pool_stats_interval_secs")]
    pub pool_stats_interval_secs: u64,
}

fn default_db_name() -> String { "master".to_string() }
fn default_log_dir() -> PathBuf { PathBuf::from("./logs") }
fn default_log_base_name() -> String { "db".to_string() }
fn default_log_level() -> String { "debug".to_string() }
fn default_log_buffer_size() -> usize { 5000 }
fn default_log_retention_days() -> u32 { 30 }
fn default_log_sweep_interval_secs() -> u64 { 24 * 60 * 60 }
fn default_metrics_buffer_size() -> i64 { 1000 }
fn default_slow_query_ms() -> u64 { 1000 }
fn default_cache_lru_capacity() -> usize { 1024 }
fn default_pool_stats_interval_secs() -> u64 { 60 }

impl Default for QuerykitConfig {
    fn default() -> Self {
        Self {
            db_name: default_db_name(),
            log_dir: default_log_dir(),
            log_base_name: default_log_base_name(),
            log_level: default_log_level(),
            log_buffer_size: default_log_buffer_size(),
            log_rotation_enabled: false,
            log_retention_days: default_log_retention_days(),
            log_sweep_interval_secs: default_log_sweep_interval_secs(),
            metrics_buffer_size: default_metrics_buffer_size(),
            slow_query_ms: default_slow_query_ms(),
            cache_lru_capacity: default_cache_lru_capacity(),
            enable_pool_stats: false,
            pool_stats_interval_secs: default_pool_stats_interval_secs(),
        }
    }
}

impl QuerykitConfig {
    /// Validate the config, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.level()?;
        if self.log_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "log_dir",
                reason: "must not be empty".into(),
            });
        }
        if self.log_base_name.is_empty() {
            return Err(ConfigError::Invalid {
                field: "log_base_name",
                reason: "must not be empty".into(),
            });
        }
        if self.log_base_name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                field: "log_base_name",
                reason: "must not contain path separators".into(),
            });
        }
        Ok(())
    }

    /// Parsed minimum log level
    pub fn level(&self) -> Result<Level, ConfigError> {
        self.log_level.parse()
    }

    /// Metrics ring capacity with the non-positive fallback applied
    #[must_use]
    pub fn metrics_capacity(&self) -> usize {
        if self.metrics_buffer_size <= 0 {
            default_metrics_buffer_size() as usize
        } else {
            self.metrics_buffer_size as usize
        }
    }

    /// Log channel capacity with the zero fallback applied
    #[must_use]
    pub fn log_capacity(&self) -> usize {
        if self.log_buffer_size == 0 {
            default_log_buffer_size()
        } else {
            self.log_buffer_size
        }
    }

    #[must_use]
    pub fn log_max_age(&self) -> Duration {
        let days = if self.log_retention_days == 0 {
            default_log_retention_days()
        } else {
            self.log_retention_days
        };
        Duration::from_secs(u64::from(days) * 24 * 60 * 60)
    }

    #[must_use]
    pub fn log_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.log_sweep_interval_secs.max(1))
    }

    #[must_use]
    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_ms)
    }

    #[must_use]
    pub fn pool_stats_interval(&self) -> Duration {
        if self.pool_stats_interval_secs < 1 {
            Duration::from_secs(default_pool_stats_interval_secs())
        } else {
            Duration::from_secs(self.pool_stats_interval_secs)
        }
    }

    #[must_use]
    pub fn lru_capacity(&self) -> usize {
        if self.cache_lru_capacity == 0 {
            default_cache_lru_capacity()
        } else {
            self.cache_lru_capacity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QuerykitConfig::default();
        assert_eq!(config.db_name, "master");
        assert_eq!(config.log_dir, PathBuf::from("./logs"));
        assert_eq!(config.log_base_name, "db");
        assert!(!config.log_rotation_enabled);
        assert_eq!(config.metrics_capacity(), 1000);
        assert_eq!(config.log_capacity(), 5000);
        assert_eq!(config.log_max_age(), Duration::from_secs(30 * 86_400));
        assert_eq!(config.slow_query_threshold(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: QuerykitConfig =
            serde_json::from_str(r#"{"log_dir": "/tmp/x", "log_rotation_enabled": true}"#).unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/tmp/x"));
        assert!(config.log_rotation_enabled);
        assert_eq!(config.log_buffer_size, 5000);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_non_positive_metrics_buffer_falls_back() {
        let config = QuerykitConfig {
            metrics_buffer_size: -5,
            ..Default::default()
        };
        assert_eq!(config.metrics_capacity(), 1000);

        let config = QuerykitConfig {
            metrics_buffer_size: 0,
            ..Default::default()
        };
        assert_eq!(config.metrics_capacity(), 1000);
    }

    #[test]
    fn test_pool_stats_interval_floor() {
        let config = QuerykitConfig {
            pool_stats_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.pool_stats_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_level_rejected() {
        let config = QuerykitConfig {
            log_level: "verbose".into(),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLevel("verbose".into()))
        );
    }

    #[test]
    fn test_empty_base_name_rejected() {
        let config = QuerykitConfig {
            log_base_name: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "log_base_name", .. })
        ));
    }
}
