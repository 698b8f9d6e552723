//! Per-key sliding window log.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::clock::{Clock, MonotonicClock};
use crate::config::duration_ms;
use crate::error::{ensure, RatekeeperError, Result};

use super::backend::{usable_key, Algorithm, RateLimiter};
use super::store::KeyedStore;

/// Configuration for a [`SlidingWindowLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingLogConfig {
    /// Length of the sliding window
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
    /// Maximum admitted cost per key within any window
    pub max_requests: u64,
}

impl SlidingLogConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(!self.window.is_zero(), || {
            "sliding window log window must be positive".into()
        })?;
        ensure(self.max_requests > 0, || {
            "sliding window log max_requests must be positive".into()
        })?;
        self.window_nanos().map(|_| ())
    }

    /// Window length in nanoseconds, rejecting windows that do not fit.
    pub(crate) fn window_nanos(&self) -> Result<u64> {
        u64::try_from(self.window.as_nanos()).map_err(|_| {
            RatekeeperError::InvalidArgument(format!(
                "sliding window log window of {}ms is too long",
                self.window.as_millis()
            ))
        })
    }
}

/// Admissions logged for one key, oldest first.
#[derive(Debug, Default)]
struct LogWindow {
    entries: VecDeque<(u64, u64)>,
    total: u64,
}

impl LogWindow {
    fn evict_before(&mut self, cutoff: u64) {
        while let Some(&(stamp, cost)) = self.entries.front() {
            if stamp >= cutoff {
                break;
            }
            self.entries.pop_front();
            self.total -= cost;
        }
    }

    fn total_since(&self, cutoff: u64) -> u64 {
        self.entries
            .iter()
            .skip_while(|(stamp, _)| *stamp < cutoff)
            .map(|(_, cost)| cost)
            .sum()
    }
}

/// Limits each key to `max_requests` within a trailing window by keeping a
/// log of admission times per key.
///
/// Evict, check and append run under the key's own lock, so the limit is
/// enforced exactly per key while different keys never contend.
pub struct SlidingWindowLog<C: Clock = MonotonicClock> {
    config: SlidingLogConfig,
    windows: KeyedStore<Mutex<LogWindow>>,
    window_nanos: u64,
    clock: C,
}

impl SlidingWindowLog<MonotonicClock> {
    pub fn new(config: SlidingLogConfig) -> Result<Self> {
        Self::with_clock(config, MonotonicClock::new())
    }
}

impl<C: Clock> SlidingWindowLog<C> {
    pub fn with_clock(config: SlidingLogConfig, clock: C) -> Result<Self> {
        config.validate()?;
        let window_nanos = config.window_nanos()?;
        info!(
            window_ms = config.window.as_millis() as u64,
            max_requests = config.max_requests,
            "Sliding window log created"
        );
        Ok(Self {
            config,
            windows: KeyedStore::new(),
            window_nanos,
            clock,
        })
    }

    pub fn config(&self) -> &SlidingLogConfig {
        &self.config
    }

    /// Try to log a request weighing `cost` against `key`.
    ///
    /// Missing or empty keys are denied.
    pub fn try_acquire(&self, key: Option<&str>, cost: u64) -> bool {
        let Some(key) = usable_key(key) else {
            debug!("Sliding window log denied request without key");
            return false;
        };

        let now = self.clock.now_nanos();
        let window = self
            .windows
            .get_or_insert_with(key, || Mutex::new(LogWindow::default()));
        let mut window = window.lock();
        window.evict_before(now.saturating_sub(self.window_nanos));

        let admitted = window
            .total
            .checked_add(cost)
            .map_or(false, |next| next <= self.config.max_requests);
        if admitted && cost > 0 {
            window.entries.push_back((now, cost));
            window.total += cost;
        }

        trace!(key = %key, cost = cost, admitted = admitted, "Sliding window log decision");
        admitted
    }

    /// Cost logged for `key` within the trailing window; the sum over all
    /// keys when `key` is `None`. Does not evict.
    pub fn request_count(&self, key: Option<&str>) -> u64 {
        let cutoff = self.clock.now_nanos().saturating_sub(self.window_nanos);
        match key {
            Some(key) => self
                .windows
                .get(key)
                .map_or(0, |window| window.lock().total_since(cutoff)),
            None => self
                .windows
                .fold(0, |acc, window| acc + window.lock().total_since(cutoff)),
        }
    }

    /// Forget `key`, or every key when `None`.
    pub fn reset(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.windows.remove(key);
            }
            None => self.windows.clear(),
        }
        debug!(key = ?key, "Sliding window log reset");
    }

    /// Number of keys holding state.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl<C: Clock> RateLimiter for SlidingWindowLog<C> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindowLog
    }

    fn try_acquire(&self, key: Option<&str>, cost: u64) -> bool {
        SlidingWindowLog::try_acquire(self, key, cost)
    }

    fn current_level(&self, key: Option<&str>) -> u64 {
        self.request_count(key)
    }

    fn reset(&self, key: Option<&str>) {
        SlidingWindowLog::reset(self, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    const WINDOW: Duration = Duration::from_millis(1000);
    const MAX: u64 = 5;

    fn log() -> (SlidingWindowLog<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let config = SlidingLogConfig {
            window: WINDOW,
            max_requests: MAX,
        };
        (SlidingWindowLog::with_clock(config, clock.clone()).unwrap(), clock)
    }

    #[test]
    fn test_sliding_log_rejects_invalid_config() {
        let config = SlidingLogConfig {
            window: Duration::ZERO,
            max_requests: 5,
        };
        assert!(SlidingWindowLog::new(config).is_err());

        let config = SlidingLogConfig {
            window: WINDOW,
            max_requests: 0,
        };
        assert!(SlidingWindowLog::new(config).is_err());
    }

    #[test]
    fn test_sliding_log_rejects_window_beyond_nanosecond_range() {
        let config = SlidingLogConfig {
            window: Duration::from_millis(18_446_744_073_710),
            max_requests: 1,
        };
        assert!(matches!(
            SlidingWindowLog::new(config),
            Err(RatekeeperError::InvalidArgument(_))
        ));

        // The longest representable window still enforces the limit
        let clock = ManualClock::new();
        let config = SlidingLogConfig {
            window: Duration::from_millis(18_446_744_073_709),
            max_requests: 1,
        };
        let log = SlidingWindowLog::with_clock(config, clock.clone()).unwrap();
        assert!(log.try_acquire(Some("k"), 1));
        clock.advance(Duration::from_millis(1));
        assert!(!log.try_acquire(Some("k"), 1));
    }

    #[test]
    fn test_sliding_log_denies_missing_key() {
        let (log, _clock) = log();
        assert!(!log.try_acquire(None, 1));
        assert!(!log.try_acquire(Some(""), 1));
        assert_eq!(log.tracked_keys(), 0);
    }

    #[test]
    fn test_sliding_log_limit_then_expiry() {
        let (log, clock) = log();

        for _ in 0..MAX {
            assert!(log.try_acquire(Some("k"), 1));
        }
        assert!(!log.try_acquire(Some("k"), 1));
        assert_eq!(log.request_count(Some("k")), MAX);

        clock.advance(Duration::from_millis(1100));
        assert_eq!(log.request_count(Some("k")), 0);
        assert!(log.try_acquire(Some("k"), 1));
        assert_eq!(log.request_count(Some("k")), 1);
    }

    #[test]
    fn test_sliding_log_keys_are_independent() {
        let (log, _clock) = log();
        for _ in 0..MAX {
            assert!(log.try_acquire(Some("a"), 1));
        }
        assert!(!log.try_acquire(Some("a"), 1));
        assert!(log.try_acquire(Some("b"), 1));

        assert_eq!(log.request_count(None), MAX + 1);
        assert_eq!(log.tracked_keys(), 2);
    }

    #[test]
    fn test_sliding_log_partial_expiry() {
        let (log, clock) = log();
        for _ in 0..3 {
            assert!(log.try_acquire(Some("k"), 1));
        }
        clock.advance(Duration::from_millis(500));
        assert!(log.try_acquire(Some("k"), 2));
        assert!(!log.try_acquire(Some("k"), 1));

        // The first three leave the window; the weighted entry stays
        clock.advance(Duration::from_millis(600));
        assert_eq!(log.request_count(Some("k")), 2);
        assert!(log.try_acquire(Some("k"), 3));
        assert!(!log.try_acquire(Some("k"), 1));
    }

    #[test]
    fn test_sliding_log_reset_key_and_all() {
        let (log, _clock) = log();
        for _ in 0..MAX {
            log.try_acquire(Some("a"), 1);
            log.try_acquire(Some("b"), 1);
        }

        log.reset(Some("a"));
        assert_eq!(log.request_count(Some("a")), 0);
        assert_eq!(log.request_count(Some("b")), MAX);

        log.reset(None);
        log.reset(None);
        assert_eq!(log.request_count(None), 0);
        assert_eq!(log.tracked_keys(), 0);
    }

    #[test]
    fn test_sliding_log_concurrent_same_key_is_exact() {
        let (log, _clock) = log();
        let allowed = AtomicUsize::new(0);
        let barrier = Barrier::new(32);

        std::thread::scope(|s| {
            for _ in 0..32 {
                s.spawn(|| {
                    barrier.wait();
                    for _ in 0..10 {
                        if log.try_acquire(Some("hot"), 1) {
                            allowed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.load(Ordering::SeqCst) as u64, MAX);
        assert_eq!(log.request_count(Some("hot")), MAX);
    }
}
