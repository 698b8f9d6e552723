//! Configuration management for Ratekeeper.
//!
//! A configuration file names a set of limiter policies. Each policy picks an
//! algorithm and carries that algorithm's parameters:
//!
//! ```yaml
//! shutdown_grace_ms: 5000
//! limiters:
//!   login:
//!     algorithm: fixed_window
//!     max_requests: 5
//!     window_ms: 1000
//!   api:
//!     algorithm: token_bucket
//!     capacity: 10
//!     refill_per_second: 5.0
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RatekeeperError, Result};
use crate::ratelimit::{
    Algorithm, FixedWindowConfig, LeakyBucketConfig, SlidingCounterConfig, SlidingLogConfig,
    TokenBucketConfig, DEFAULT_SHUTDOWN_GRACE,
};

/// Main configuration: a set of named limiter policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatekeeperConfig {
    /// How long shutdown waits for background tasks
    #[serde(
        rename = "shutdown_grace_ms",
        default = "default_shutdown_grace",
        with = "duration_ms"
    )]
    pub shutdown_grace: Duration,

    /// Limiter policies by name
    #[serde(default)]
    pub limiters: BTreeMap<String, LimiterPolicy>,
}

impl Default for RatekeeperConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: default_shutdown_grace(),
            limiters: BTreeMap::new(),
        }
    }
}

fn default_shutdown_grace() -> Duration {
    DEFAULT_SHUTDOWN_GRACE
}

/// One limiter policy, tagged by algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterPolicy {
    FixedWindow(FixedWindowConfig),
    SlidingWindowCounter(SlidingCounterConfig),
    SlidingWindowLog(SlidingLogConfig),
    LeakyBucket(LeakyBucketConfig),
    TokenBucket(TokenBucketConfig),
}

impl LimiterPolicy {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            LimiterPolicy::FixedWindow(_) => Algorithm::FixedWindow,
            LimiterPolicy::SlidingWindowCounter(_) => Algorithm::SlidingWindowCounter,
            LimiterPolicy::SlidingWindowLog(_) => Algorithm::SlidingWindowLog,
            LimiterPolicy::LeakyBucket(_) => Algorithm::LeakyBucket,
            LimiterPolicy::TokenBucket(_) => Algorithm::TokenBucket,
        }
    }

    /// Check the parameters with the same rules the limiter constructors use.
    pub fn validate(&self) -> Result<()> {
        match self {
            LimiterPolicy::FixedWindow(config) => config.validate(),
            LimiterPolicy::SlidingWindowCounter(config) => config.validate(),
            LimiterPolicy::SlidingWindowLog(config) => config.validate(),
            LimiterPolicy::LeakyBucket(config) => config.validate(),
            LimiterPolicy::TokenBucket(config) => config.validate(),
        }
    }
}

impl RatekeeperConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RatekeeperError::Config(format!("Failed to parse limiter config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every policy, naming the first one that fails.
    pub fn validate(&self) -> Result<()> {
        for (name, policy) in &self.limiters {
            if name.is_empty() {
                return Err(RatekeeperError::Config("limiter name must not be empty".into()));
            }
            policy.validate().map_err(|e| {
                RatekeeperError::Config(format!("limiter '{}' ({}): {}", name, policy.algorithm(), e))
            })?;
        }
        Ok(())
    }
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
