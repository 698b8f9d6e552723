//! Per-key fixed window limiter with a global reset boundary.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::duration_ms;
use crate::error::{ensure, RatekeeperError, Result};

use super::backend::{usable_key, Algorithm, RateLimiter};
use super::scheduler::{ResetScheduler, DEFAULT_SHUTDOWN_GRACE};
use super::store::KeyedStore;

/// Configuration for a [`FixedWindowLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowConfig {
    /// Maximum admitted cost per key within one window
    pub max_requests: u64,
    /// Time between global resets
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
}

impl FixedWindowConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(self.max_requests > 0, || {
            "fixed window max_requests must be positive".into()
        })?;
        ensure(!self.window.is_zero(), || "fixed window window must be positive".into())
    }
}

/// Counts requests per key and clears every counter at once when the window
/// elapses.
///
/// All keys share one boundary, driven by a background task started with the
/// limiter. Up to twice `max_requests` can be admitted for a key across a
/// boundary. The task runs until [`shutdown`](RateLimiter::shutdown); after
/// that every request is rejected.
pub struct FixedWindowLimiter {
    config: FixedWindowConfig,
    counters: Arc<KeyedStore<AtomicU64>>,
    epoch: Arc<AtomicU64>,
    scheduler: Mutex<Option<ResetScheduler>>,
    shut_down: AtomicBool,
    shutdown_grace: Duration,
}

impl FixedWindowLimiter {
    /// Create the limiter and start its reset task on the current tokio
    /// runtime.
    pub fn start(config: FixedWindowConfig) -> Result<Self> {
        Self::start_with_grace(config, DEFAULT_SHUTDOWN_GRACE)
    }

    /// Like [`start`](Self::start), with a custom bound on how long
    /// shutdown waits for the reset task.
    pub fn start_with_grace(config: FixedWindowConfig, shutdown_grace: Duration) -> Result<Self> {
        config.validate()?;

        let counters: Arc<KeyedStore<AtomicU64>> = Arc::new(KeyedStore::new());
        let epoch = Arc::new(AtomicU64::new(0));

        let reset_counters = Arc::clone(&counters);
        let reset_epoch = Arc::clone(&epoch);
        let scheduler = ResetScheduler::spawn("fixed-window-reset", config.window, move || {
            let cleared = reset_counters.len();
            reset_counters.clear();
            let window = reset_epoch.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(window = window, cleared_keys = cleared, "Fixed window reset");
        })?;

        info!(
            max_requests = config.max_requests,
            window_ms = config.window.as_millis() as u64,
            "Fixed window limiter created"
        );

        Ok(Self {
            config,
            counters,
            epoch,
            scheduler: Mutex::new(Some(scheduler)),
            shut_down: AtomicBool::new(false),
            shutdown_grace,
        })
    }

    pub fn config(&self) -> &FixedWindowConfig {
        &self.config
    }

    /// Try to count `cost` against `key` in the current window.
    ///
    /// Returns `Ok(false)` for a denial, including a missing or empty key,
    /// and `Err(ShutDown)` once the limiter has been shut down.
    pub fn acquire(&self, key: Option<&str>, cost: u64) -> Result<bool> {
        if self.is_shut_down() {
            return Err(RatekeeperError::ShutDown);
        }
        let Some(key) = usable_key(key) else {
            debug!("Fixed window denied request without key");
            return Ok(false);
        };

        let max = self.config.max_requests;
        let counter = self.counters.get_or_insert_with(key, || AtomicU64::new(0));
        let admitted = counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_add(cost).filter(|next| *next <= max)
            })
            .is_ok();

        trace!(key = %key, cost = cost, admitted = admitted, "Fixed window decision");
        Ok(admitted)
    }

    /// Count for `key` in the current window, or the sum over all keys.
    pub fn count(&self, key: Option<&str>) -> u64 {
        match key {
            Some(key) => self
                .counters
                .get(key)
                .map_or(0, |count| count.load(Ordering::Acquire)),
            None => self
                .counters
                .fold(0, |acc, count| acc + count.load(Ordering::Acquire)),
        }
    }

    /// Number of completed windows since the limiter started.
    pub fn current_window(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Number of keys counted in the current window.
    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }

    fn try_acquire(&self, key: Option<&str>, cost: u64) -> bool {
        self.acquire(key, cost).unwrap_or_else(|err| {
            warn!(error = %err, "Fixed window limiter used after shutdown");
            false
        })
    }

    fn current_level(&self, key: Option<&str>) -> u64 {
        self.count(key)
    }

    fn reset(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.counters.remove(key);
            }
            None => self.counters.clear(),
        }
        debug!(key = ?key, "Fixed window counters reset");
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown(self.shutdown_grace).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    const MAX: u64 = 5;
    const WINDOW: Duration = Duration::from_millis(1000);

    fn config() -> FixedWindowConfig {
        FixedWindowConfig {
            max_requests: MAX,
            window: WINDOW,
        }
    }

    #[tokio::test]
    async fn test_fixed_window_rejects_invalid_config() {
        let zero_max = FixedWindowConfig {
            max_requests: 0,
            window: WINDOW,
        };
        assert!(matches!(
            FixedWindowLimiter::start(zero_max),
            Err(RatekeeperError::InvalidArgument(_))
        ));

        let zero_window = FixedWindowConfig {
            max_requests: 1,
            window: Duration::ZERO,
        };
        assert!(FixedWindowLimiter::start(zero_window).is_err());
    }

    #[test]
    fn test_fixed_window_requires_runtime() {
        assert!(matches!(
            FixedWindowLimiter::start(config()),
            Err(RatekeeperError::Runtime(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_denies_missing_key() {
        let limiter = FixedWindowLimiter::start(config()).unwrap();

        assert!(!limiter.try_acquire(None, 1));
        assert!(!limiter.try_acquire(Some(""), 1));
        assert_eq!(limiter.tracked_keys(), 0);

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_limit_within_window() {
        let limiter = FixedWindowLimiter::start(config()).unwrap();

        for _ in 0..MAX {
            assert!(limiter.try_acquire(Some("testKey"), 1));
        }
        assert!(!limiter.try_acquire(Some("testKey"), 1));
        assert_eq!(limiter.count(Some("testKey")), MAX);

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_global_reset() {
        let limiter = FixedWindowLimiter::start(config()).unwrap();

        for _ in 0..MAX {
            assert!(limiter.try_acquire(Some("a"), 1));
            assert!(limiter.try_acquire(Some("b"), 1));
        }
        assert!(!limiter.try_acquire(Some("a"), 1));
        assert!(!limiter.try_acquire(Some("b"), 1));

        tokio::time::sleep(WINDOW + Duration::from_millis(100)).await;

        // Every key sees the same boundary
        assert_eq!(limiter.current_window(), 1);
        assert_eq!(limiter.count(None), 0);
        assert!(limiter.try_acquire(Some("a"), 1));
        assert!(limiter.try_acquire(Some("b"), 1));

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_keys_tracked_separately() {
        let limiter = FixedWindowLimiter::start(config()).unwrap();

        for _ in 0..MAX {
            assert!(limiter.try_acquire(Some("key1"), 1));
        }
        assert!(limiter.try_acquire(Some("key2"), 1));
        assert_eq!(limiter.count(None), MAX + 1);

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_weighted_cost() {
        let limiter = FixedWindowLimiter::start(config()).unwrap();

        assert!(!limiter.try_acquire(Some("k"), MAX + 1));
        assert!(limiter.try_acquire(Some("k"), 3));
        assert!(!limiter.try_acquire(Some("k"), 3));
        assert_eq!(limiter.count(Some("k")), 3);

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_manual_reset() {
        let limiter = FixedWindowLimiter::start(config()).unwrap();
        for _ in 0..MAX {
            limiter.try_acquire(Some("a"), 1);
            limiter.try_acquire(Some("b"), 1);
        }

        limiter.reset(Some("a"));
        assert_eq!(limiter.current_level(Some("a")), 0);
        assert_eq!(limiter.current_level(Some("b")), MAX);

        limiter.reset(None);
        limiter.reset(None);
        assert_eq!(limiter.current_level(None), 0);

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_rejects_after_shutdown() {
        let limiter = FixedWindowLimiter::start(config()).unwrap();
        assert!(limiter.try_acquire(Some("k"), 1));

        limiter.shutdown().await;
        limiter.shutdown().await;

        assert!(limiter.is_shut_down());
        assert!(!limiter.try_acquire(Some("k"), 1));
        assert!(matches!(
            limiter.acquire(Some("k"), 1),
            Err(RatekeeperError::ShutDown)
        ));

        // No further resets happen once the task is gone
        tokio::time::sleep(WINDOW * 3).await;
        assert_eq!(limiter.current_window(), 0);
    }

    #[tokio::test]
    async fn test_fixed_window_concurrent_requests() {
        let config = FixedWindowConfig {
            max_requests: 3,
            window: Duration::from_secs(60),
        };
        let limiter = FixedWindowLimiter::start(config).unwrap();
        let allowed = AtomicUsize::new(0);
        let barrier = Barrier::new(100);

        std::thread::scope(|s| {
            for _ in 0..100 {
                s.spawn(|| {
                    barrier.wait();
                    for _ in 0..10 {
                        if limiter.try_acquire(Some("shared"), 1) {
                            allowed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.count(Some("shared")), 3);

        limiter.shutdown().await;
    }
}
