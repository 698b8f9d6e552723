//! Leaky bucket limiter.

use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use crate::clock::{Clock, MonotonicClock};
use crate::error::{ensure, Result};

use super::backend::{Algorithm, RateLimiter};
use super::snapshot::{units_between, AtomicSnapshot, BucketSnapshot, MAX_BUCKET_CAPACITY};

/// Configuration for a [`LeakyBucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakyBucketConfig {
    /// Maximum water the bucket holds
    pub capacity: u64,
    /// Units drained per second. Zero never drains.
    #[serde(default)]
    pub leak_rate_per_second: u64,
}

impl LeakyBucketConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(self.capacity > 0, || "leaky bucket capacity must be positive".into())?;
        ensure(self.capacity <= MAX_BUCKET_CAPACITY, || {
            format!(
                "leaky bucket capacity {} exceeds maximum {}",
                self.capacity, MAX_BUCKET_CAPACITY
            )
        })
    }
}

/// A shared bucket that fills with each admitted request and drains at a
/// constant rate. Requests that would overflow it are denied.
///
/// Drain is measured against a fixed accrual grid rather than the time since
/// the last call, so partial progress is never lost and rates below one unit
/// per millisecond still drain at their configured pace.
#[derive(Debug)]
pub struct LeakyBucket<C: Clock = MonotonicClock> {
    config: LeakyBucketConfig,
    state: AtomicSnapshot,
    clock: C,
}

impl LeakyBucket<MonotonicClock> {
    /// Create an empty bucket on the monotonic clock.
    pub fn new(config: LeakyBucketConfig) -> Result<Self> {
        Self::with_clock(config, MonotonicClock::new())
    }
}

impl<C: Clock> LeakyBucket<C> {
    /// Create an empty bucket reading time from `clock`.
    pub fn with_clock(config: LeakyBucketConfig, clock: C) -> Result<Self> {
        config.validate()?;
        info!(
            capacity = config.capacity,
            leak_rate_per_second = config.leak_rate_per_second,
            "Leaky bucket created"
        );
        let state = AtomicSnapshot::new(BucketSnapshot::new(0, clock.now_millis()));
        Ok(Self {
            config,
            state,
            clock,
        })
    }

    pub fn config(&self) -> &LeakyBucketConfig {
        &self.config
    }

    /// Pour `cost` units in. Returns `true` if they fit.
    pub fn try_acquire(&self, cost: u64) -> bool {
        let now = self.clock.now_millis();
        let capacity = self.config.capacity;

        let admitted = self.state.try_transition(|current| {
            let drained = self.drain(current, now);
            let water = drained.level.checked_add(cost)?;
            (water <= capacity).then(|| BucketSnapshot::new(water, drained.stamp_ms))
        });

        trace!(cost = cost, admitted = admitted, "Leaky bucket decision");
        admitted
    }

    /// Water held right now, after draining. Does not modify the bucket.
    pub fn current_water(&self) -> u64 {
        self.drain(self.state.load(), self.clock.now_millis()).level
    }

    /// Empty the bucket.
    pub fn reset(&self) {
        self.state
            .store(BucketSnapshot::new(0, self.clock.now_millis()));
    }

    /// Apply the leak between `current.stamp_ms` and `now`.
    fn drain(&self, current: BucketSnapshot, now: u64) -> BucketSnapshot {
        let rate = self.config.leak_rate_per_second;
        if rate == 0 {
            return current;
        }

        let now = now.max(current.stamp_ms);
        let leaked = units_between(current.stamp_ms, now, rate as f64);
        BucketSnapshot::new(current.level.saturating_sub(leaked), now)
    }
}

impl<C: Clock> RateLimiter for LeakyBucket<C> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::LeakyBucket
    }

    fn try_acquire(&self, _key: Option<&str>, cost: u64) -> bool {
        LeakyBucket::try_acquire(self, cost)
    }

    fn current_level(&self, _key: Option<&str>) -> u64 {
        self.current_water()
    }

    fn reset(&self, _key: Option<&str>) {
        LeakyBucket::reset(self)
    }
}
