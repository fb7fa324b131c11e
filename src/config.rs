//! Configuration management for the tiered limiter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::LimiterError;
use crate::ratelimit::tier::{validate_tiers, MAX_WINDOW};
use crate::ratelimit::Tier;

/// Default namespace prefix for store keys.
pub const DEFAULT_PREFIX: &str = "LIMIT";
/// Default quota when a call supplies no tiers.
pub const DEFAULT_MAX: i64 = 2500;
/// Default window in milliseconds when a call supplies no tiers.
pub const DEFAULT_DURATION: i64 = 3_600_000;
/// Smallest accepted default window in milliseconds.
pub const MIN_DURATION: i64 = 100;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "TIERED_LIMITER";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Layered configuration could not be built or deserialized.
    #[error("Configuration error: {0}")]
    Load(#[from] ::config::ConfigError),

    /// A policy file could not be parsed.
    #[error("Failed to parse policy config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configured policy contains an invalid tier.
    #[error("policy `{name}`: {source}")]
    InvalidPolicy {
        /// Name of the offending policy
        name: String,
        /// The validation failure
        source: LimiterError,
    },

    /// A policy was requested that is not configured.
    #[error("unknown policy `{0}`")]
    UnknownPolicy(String),
}

/// Limiter defaults: namespace and the tier used when a call names none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Namespace prefix for store keys
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Default quota, must be at least 1
    #[serde(default = "default_max")]
    pub max: i64,

    /// Default window in milliseconds, from 100 up to `MAX_WINDOW`
    #[serde(default = "default_duration")]
    pub duration: i64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            max: default_max(),
            duration: default_duration(),
        }
    }
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_max() -> i64 {
    DEFAULT_MAX
}

fn default_duration() -> i64 {
    DEFAULT_DURATION
}

impl LimiterConfig {
    /// Set the namespace prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the default quota.
    pub fn max(mut self, max: i64) -> Self {
        self.max = max;
        self
    }

    /// Set the default window in milliseconds.
    pub fn duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    /// Replace out-of-range values with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.prefix.is_empty() {
            warn!("Empty key prefix configured, using default");
            self.prefix = default_prefix();
        }
        if self.max < 1 {
            warn!(max = self.max, default = DEFAULT_MAX, "Invalid default quota, using default");
            self.max = DEFAULT_MAX;
        }
        if !(MIN_DURATION..=MAX_WINDOW).contains(&self.duration) {
            warn!(
                duration = self.duration,
                default = DEFAULT_DURATION,
                "Invalid default window, using default"
            );
            self.duration = DEFAULT_DURATION;
        }
        self
    }
}

/// Which store backs the limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local store. Counters are not shared between processes.
    Memory,
    /// A single Redis node.
    Redis(RedisConfig),
    /// A Redis Cluster.
    Cluster(ClusterConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Redis(RedisConfig::default())
    }
}

/// Single node Redis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss://)
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Response timeout for Redis commands in milliseconds
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            response_timeout_ms: default_response_timeout_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }
}

impl RedisConfig {
    /// Response timeout as a duration.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Connection timeout as a duration.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_response_timeout_ms() -> u64 {
    1000
}

fn default_connection_timeout_ms() -> u64 {
    5000
}

/// Redis Cluster configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Seed node URLs
    pub nodes: Vec<String>,
}

/// Configuration of the `tiered-limiter` binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Limiter defaults
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Store backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Named policies
    #[serde(default)]
    pub policies: HashMap<String, Vec<Tier>>,
}

impl AppConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `TIERED_LIMITER__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let config: AppConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every tier of every named policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, tiers) in &self.policies {
            validate_tiers(tiers).map_err(|source| ConfigError::InvalidPolicy {
                name: name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Look up a named policy.
    pub fn policy(&self, name: &str) -> Result<&[Tier], ConfigError> {
        self.policies
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ConfigError::UnknownPolicy(name.to_string()))
    }
}
