//! Rate limiter trait shared by every admission-control primitive.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The algorithm behind a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    FixedWindow,
    SlidingWindowCounter,
    SlidingWindowLog,
    LeakyBucket,
    TokenBucket,
}

impl Algorithm {
    /// Whether the limiter keeps independent state per key.
    pub fn is_keyed(&self) -> bool {
        matches!(self, Algorithm::FixedWindow | Algorithm::SlidingWindowLog)
    }

    /// Name as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindowCounter => "sliding_window_counter",
            Algorithm::SlidingWindowLog => "sliding_window_log",
            Algorithm::LeakyBucket => "leaky_bucket",
            Algorithm::TokenBucket => "token_bucket",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for rate limiter implementations.
///
/// Keyed limiters (fixed window, sliding log) deny any call whose key is
/// missing or empty. Shared limiters ignore the key entirely.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// The algorithm this limiter implements.
    fn algorithm(&self) -> Algorithm;

    /// Try to admit a unit of work weighing `cost`.
    ///
    /// Returns `true` if admitted. The state change that goes with an admit
    /// is visible before this returns; a denial changes nothing.
    fn try_acquire(&self, key: Option<&str>, cost: u64) -> bool;

    /// Try to admit a single unit of work.
    fn try_acquire_one(&self, key: Option<&str>) -> bool {
        self.try_acquire(key, 1)
    }

    /// Read-only snapshot of the limiter's fill level for monitoring.
    ///
    /// For keyed limiters `None` reports the sum over all keys.
    fn current_level(&self, key: Option<&str>) -> u64;

    /// Clear the state for one key, or everything when `key` is `None`.
    fn reset(&self, key: Option<&str>);

    /// Release background resources. Safe to call more than once.
    async fn shutdown(&self) {}
}

/// Returns the key if it can address per-key state.
#[inline]
pub(crate) fn usable_key(key: Option<&str>) -> Option<&str> {
    key.filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_key() {
        assert_eq!(usable_key(Some("client")), Some("client"));
        assert_eq!(usable_key(Some("")), None);
        assert_eq!(usable_key(None), None);
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(Algorithm::TokenBucket.to_string(), "token_bucket");
        assert!(Algorithm::FixedWindow.is_keyed());
        assert!(Algorithm::SlidingWindowLog.is_keyed());
        assert!(!Algorithm::LeakyBucket.is_keyed());
    }
}
