//! Configuration management.
//!
//! TOML configuration with serde defaults; every section can be omitted.
//!
//! # Configuration File Format
//!
//! ```toml
//! [[sources]]
//! id = "scopus"
//! variant = "external"
//!
//! [sources.throttle]
//! max_events = 6
//! period_seconds = 10
//! min_delay_ms = 500
//! timeout_seconds = 120
//!
//! [sources.cache]
//! enabled = true
//! ttl_seconds = 3600
//! lock_lease_seconds = 900
//! lock_timeout_seconds = 180
//!
//! [sources.log]
//! enabled = true
//! retention_seconds = 604800
//!
//! [[sources]]
//! id = "wok"
//! variant = "external"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::utils::throttle::ThrottleConfig;

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Configured federated sources
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load from the path in `CITEFED_CONFIG`, if set; defaults otherwise.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var("CITEFED_CONFIG") {
            Ok(path) => Self::load(path),
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Which implementation backs a configured source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceVariant {
    /// In-crate test double
    Mock,

    /// Provider connection registered by an external crate
    External,
}

impl Default for SourceVariant {
    fn default() -> Self {
        SourceVariant::External
    }
}

/// Configuration of one federated source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source identifier
    pub id: String,

    /// Which implementation to construct
    #[serde(default)]
    pub variant: SourceVariant,

    /// Rate limiting for this source
    #[serde(default)]
    pub throttle: ThrottleSettings,

    /// Search result caching for this source
    #[serde(default)]
    pub cache: SourceCacheConfig,

    /// Request/result audit logging for this source
    #[serde(default)]
    pub log: SourceLogConfig,
}

impl SourceConfig {
    /// A mock source with default settings, for tests.
    pub fn mock(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            variant: SourceVariant::Mock,
            throttle: ThrottleSettings::default(),
            cache: SourceCacheConfig::default(),
            log: SourceLogConfig::default(),
        }
    }
}

/// Sliding-window throttle settings for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleSettings {
    /// Maximum starts within any rolling period
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Rolling window length in seconds
    #[serde(default = "default_period_seconds")]
    pub period_seconds: u64,

    /// Minimum delay between successive starts, milliseconds
    #[serde(default)]
    pub min_delay_ms: u64,

    /// Cool-down after a call finishes, milliseconds
    #[serde(default)]
    pub finished_delay_ms: u64,

    /// Extra delay once a full window has to drain, milliseconds
    #[serde(default)]
    pub period_delay_ms: u64,

    /// Upper bound on the acquire wait in seconds; absent means unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            period_seconds: default_period_seconds(),
            min_delay_ms: 0,
            finished_delay_ms: 0,
            period_delay_ms: 0,
            timeout_seconds: None,
        }
    }
}

impl ThrottleSettings {
    pub fn to_throttle_config(&self) -> ThrottleConfig {
        let mut config = ThrottleConfig::new(
            self.max_events,
            Duration::from_secs(self.period_seconds),
        )
        .min_delay(Duration::from_millis(self.min_delay_ms))
        .finished_delay(Duration::from_millis(self.finished_delay_ms))
        .period_delay(Duration::from_millis(self.period_delay_ms));
        if let Some(timeout) = self.timeout_seconds {
            config = config.timeout(Duration::from_secs(timeout));
        }
        config
    }
}

fn default_max_events() -> usize {
    5
}

fn default_period_seconds() -> u64 {
    10
}

/// Search result cache settings for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCacheConfig {
    /// Whether search results are cached at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long cached results live, seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,

    /// Single-flight lock lease, seconds
    #[serde(default = "default_lock_lease")]
    pub lock_lease_seconds: u64,

    /// Single-flight lock acquire timeout, seconds
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_seconds: u64,
}

impl Default for SourceCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_cache_ttl(),
            lock_lease_seconds: default_lock_lease(),
            lock_timeout_seconds: default_lock_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    60 * 60
}

fn default_lock_lease() -> u64 {
    15 * 60
}

fn default_lock_timeout() -> u64 {
    3 * 60
}

/// Request log settings for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLogConfig {
    /// Whether request/result records are kept
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long log records live, seconds
    #[serde(default = "default_log_retention")]
    pub retention_seconds: u64,
}

impl Default for SourceLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_seconds: default_log_retention(),
        }
    }
}

fn default_log_retention() -> u64 {
    7 * 24 * 60 * 60
}
