//! Shared sliding window counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_skiplist::SkipMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::clock::{Clock, MonotonicClock};
use crate::config::duration_ms;
use crate::error::{ensure, RatekeeperError, Result};

use super::backend::{Algorithm, RateLimiter};

/// Configuration for a [`SlidingWindowCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingCounterConfig {
    /// Length of the sliding window
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
    /// Maximum admitted cost within any window
    pub limit: u64,
}

impl SlidingCounterConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(!self.window.is_zero(), || {
            "sliding window counter window must be positive".into()
        })?;
        ensure(self.limit > 0, || "sliding window counter limit must be positive".into())?;
        self.window_nanos().map(|_| ())
    }

    /// Window length in nanoseconds, rejecting windows that do not fit.
    pub(crate) fn window_nanos(&self) -> Result<u64> {
        u64::try_from(self.window.as_nanos()).map_err(|_| {
            RatekeeperError::InvalidArgument(format!(
                "sliding window counter window of {}ms is too long",
                self.window.as_millis()
            ))
        })
    }
}

/// One limiter shared by all callers, bounding admissions within a trailing
/// window.
///
/// Every admission is logged as `(timestamp, sequence) -> cost` in a
/// lock-free skip list and counted in `admitted`. A caller first reserves
/// room by compare-and-swapping `admitted`, then logs its entry. Expired
/// entries are removed from the front of the log and their cost is given
/// back to `admitted` by whichever thread's removal succeeds, so `admitted`
/// never drifts from the log.
pub struct SlidingWindowCounter<C: Clock = MonotonicClock> {
    config: SlidingCounterConfig,
    log: SkipMap<(u64, u64), u64>,
    admitted: AtomicU64,
    sequence: AtomicU64,
    window_nanos: u64,
    clock: C,
}

impl SlidingWindowCounter<MonotonicClock> {
    pub fn new(config: SlidingCounterConfig) -> Result<Self> {
        Self::with_clock(config, MonotonicClock::new())
    }
}

impl<C: Clock> SlidingWindowCounter<C> {
    pub fn with_clock(config: SlidingCounterConfig, clock: C) -> Result<Self> {
        config.validate()?;
        let window_nanos = config.window_nanos()?;
        info!(
            window_ms = config.window.as_millis() as u64,
            limit = config.limit,
            "Sliding window counter created"
        );
        Ok(Self {
            config,
            log: SkipMap::new(),
            admitted: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            window_nanos,
            clock,
        })
    }

    pub fn config(&self) -> &SlidingCounterConfig {
        &self.config
    }

    /// Try to admit a request weighing `cost`.
    pub fn try_acquire(&self, cost: u64) -> bool {
        let now = self.clock.now_nanos();
        self.evict_before(now.saturating_sub(self.window_nanos));

        let limit = self.config.limit;
        let reserved = self
            .admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_add(cost).filter(|next| *next <= limit)
            });

        let admitted = match reserved {
            Ok(_) => {
                if cost > 0 {
                    let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                    self.log.insert((now, seq), cost);
                }
                true
            }
            Err(_) => false,
        };

        trace!(cost = cost, admitted = admitted, "Sliding window counter decision");
        admitted
    }

    /// Cost admitted within the trailing window. Does not evict.
    pub fn count(&self) -> u64 {
        let cutoff = self.clock.now_nanos().saturating_sub(self.window_nanos);
        self.log
            .range((cutoff, 0)..)
            .map(|entry| *entry.value())
            .sum()
    }

    /// Total cost the counter currently holds, including entries that have
    /// expired but not yet been evicted.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Acquire)
    }

    /// Forget every logged admission.
    pub fn reset(&self) {
        self.evict_before(u64::MAX);
        debug!("Sliding window counter reset");
    }

    /// Remove entries stamped before `cutoff` and release their cost.
    fn evict_before(&self, cutoff: u64) {
        while let Some(entry) = self.log.front() {
            if entry.key().0 >= cutoff {
                break;
            }
            if entry.remove() {
                self.admitted.fetch_sub(*entry.value(), Ordering::AcqRel);
            }
        }
    }
}

impl<C: Clock> RateLimiter for SlidingWindowCounter<C> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindowCounter
    }

    fn try_acquire(&self, _key: Option<&str>, cost: u64) -> bool {
        SlidingWindowCounter::try_acquire(self, cost)
    }

    fn current_level(&self, _key: Option<&str>) -> u64 {
        self.count()
    }

    fn reset(&self, _key: Option<&str>) {
        SlidingWindowCounter::reset(self)
    }
}
