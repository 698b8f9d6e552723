//! Named limiters built from configuration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, trace, warn};

use crate::config::{LimiterPolicy, RatekeeperConfig};
use crate::error::Result;

use super::backend::RateLimiter;
use super::fixed_window::FixedWindowLimiter;
use super::leaky_bucket::LeakyBucket;
use super::sliding_counter::SlidingWindowCounter;
use super::sliding_log::SlidingWindowLog;
use super::token_bucket::TokenBucket;

/// A set of limiters addressed by name.
///
/// Requests for a name that was never configured are denied.
pub struct LimiterRegistry {
    limiters: BTreeMap<String, Arc<dyn RateLimiter>>,
}

impl LimiterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            limiters: BTreeMap::new(),
        }
    }

    /// Build every limiter in `config`.
    ///
    /// Fixed window policies start their reset task, so this must run inside
    /// a tokio runtime when the configuration contains any.
    pub fn from_config(config: &RatekeeperConfig) -> Result<Self> {
        config.validate()?;

        let mut registry = Self::new();
        for (name, policy) in &config.limiters {
            let limiter = build_limiter(policy, config.shutdown_grace)?;
            registry.insert(name.clone(), limiter);
        }

        info!(limiters = registry.len(), "Limiter registry built");
        Ok(registry)
    }

    /// Register `limiter` under `name`, replacing any previous one.
    pub fn insert(&mut self, name: impl Into<String>, limiter: Arc<dyn RateLimiter>) {
        let name = name.into();
        info!(name = %name, algorithm = %limiter.algorithm(), "Registering limiter");
        self.limiters.insert(name, limiter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RateLimiter>> {
        self.limiters.get(name).cloned()
    }

    /// Route an admission check to the limiter called `name`.
    pub fn try_acquire(&self, name: &str, key: Option<&str>, cost: u64) -> bool {
        match self.limiters.get(name) {
            Some(limiter) => {
                let admitted = limiter.try_acquire(key, cost);
                trace!(name = %name, admitted = admitted, "Registry decision");
                admitted
            }
            None => {
                warn!(name = %name, "Unknown limiter, denying request");
                false
            }
        }
    }

    /// Level of the limiter called `name`, if it exists.
    pub fn current_level(&self, name: &str, key: Option<&str>) -> Option<u64> {
        self.limiters.get(name).map(|limiter| limiter.current_level(key))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Shut every limiter down concurrently.
    pub async fn shutdown(&self) {
        info!(limiters = self.len(), "Shutting down limiters");
        join_all(self.limiters.values().map(|limiter| limiter.shutdown())).await;
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_limiter(policy: &LimiterPolicy, grace: Duration) -> Result<Arc<dyn RateLimiter>> {
    let limiter: Arc<dyn RateLimiter> = match policy {
        LimiterPolicy::FixedWindow(config) => {
            Arc::new(FixedWindowLimiter::start_with_grace(*config, grace)?)
        }
        LimiterPolicy::SlidingWindowCounter(config) => Arc::new(SlidingWindowCounter::new(*config)?),
        LimiterPolicy::SlidingWindowLog(config) => Arc::new(SlidingWindowLog::new(*config)?),
        LimiterPolicy::LeakyBucket(config) => Arc::new(LeakyBucket::new(*config)?),
        LimiterPolicy::TokenBucket(config) => Arc::new(TokenBucket::new(*config)?),
    };
    Ok(limiter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Algorithm;

    const CONFIG: &str = r#"
shutdown_grace_ms: 100
limiters:
  login:
    algorithm: fixed_window
    max_requests: 2
    window_ms: 1000
  api:
    algorithm: token_bucket
    capacity: 3
    refill_per_second: 1.0
  uploads:
    algorithm: sliding_window_log
    max_requests: 1
    window_ms: 60000
"#;

    #[tokio::test(start_paused = true)]
    async fn test_registry_from_config() {
        let config = RatekeeperConfig::from_yaml(CONFIG).unwrap();
        let registry = LimiterRegistry::from_config(&config).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["api", "login", "uploads"]);
        assert_eq!(
            registry.get("login").unwrap().algorithm(),
            Algorithm::FixedWindow
        );

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_routes_by_name() {
        let config = RatekeeperConfig::from_yaml(CONFIG).unwrap();
        let registry = LimiterRegistry::from_config(&config).unwrap();

        assert!(registry.try_acquire("login", Some("alice"), 1));
        assert!(registry.try_acquire("login", Some("alice"), 1));
        assert!(!registry.try_acquire("login", Some("alice"), 1));
        assert!(registry.try_acquire("login", Some("bob"), 1));

        assert!(registry.try_acquire("api", None, 3));
        assert!(!registry.try_acquire("api", None, 1));
        assert_eq!(registry.current_level("api", None), Some(0));

        assert!(registry.try_acquire("uploads", Some("alice"), 1));
        assert!(!registry.try_acquire("uploads", Some("alice"), 1));

        registry.shutdown().await;
    }

    #[test]
    fn test_registry_denies_unknown_limiter() {
        let registry = LimiterRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.try_acquire("missing", Some("k"), 1));
        assert_eq!(registry.current_level("missing", None), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_shutdown_stops_fixed_windows() {
        let config = RatekeeperConfig::from_yaml(CONFIG).unwrap();
        let registry = LimiterRegistry::from_config(&config).unwrap();

        registry.shutdown().await;
        registry.shutdown().await;

        assert!(!registry.try_acquire("login", Some("alice"), 1));
        // Limiters without background work keep serving
        assert!(registry.try_acquire("api", None, 1));
    }

    #[test]
    fn test_registry_without_runtime_fails_for_fixed_window() {
        let config = RatekeeperConfig::from_yaml(CONFIG).unwrap();
        assert!(LimiterRegistry::from_config(&config).is_err());
    }
}
