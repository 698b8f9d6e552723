//! Token bucket limiter.

use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use crate::clock::{Clock, MonotonicClock};
use crate::error::{ensure, Result};

use super::backend::{Algorithm, RateLimiter};
use super::snapshot::{units_between, AtomicSnapshot, BucketSnapshot, MAX_BUCKET_CAPACITY};

/// Configuration for a [`TokenBucket`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Tokens added per second; may be fractional
    pub refill_per_second: f64,
    /// Maximum tokens the bucket holds
    pub capacity: u64,
}

impl TokenBucketConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(
            self.refill_per_second.is_finite() && self.refill_per_second > 0.0,
            || {
                format!(
                    "token bucket refill rate must be positive, got {}",
                    self.refill_per_second
                )
            },
        )?;
        ensure(self.capacity > 0, || "token bucket capacity must be positive".into())?;
        ensure(self.capacity <= MAX_BUCKET_CAPACITY, || {
            format!(
                "token bucket capacity {} exceeds maximum {}",
                self.capacity, MAX_BUCKET_CAPACITY
            )
        })
    }
}

/// A shared bucket of tokens refilled at a constant rate.
///
/// The bucket starts full, so bursts up to `capacity` are admitted at once
/// while the long-run rate stays at `refill_per_second`.
///
/// # Example
///
/// ```rust
/// use ratekeeper::ratelimit::{TokenBucket, TokenBucketConfig};
///
/// let bucket = TokenBucket::new(TokenBucketConfig {
///     refill_per_second: 5.0,
///     capacity: 10,
/// })
/// .unwrap();
///
/// assert!(bucket.try_acquire(10));
/// assert!(!bucket.try_acquire(1));
/// ```
#[derive(Debug)]
pub struct TokenBucket<C: Clock = MonotonicClock> {
    config: TokenBucketConfig,
    state: AtomicSnapshot,
    clock: C,
}

impl TokenBucket<MonotonicClock> {
    /// Create a full bucket on the monotonic clock.
    pub fn new(config: TokenBucketConfig) -> Result<Self> {
        Self::with_clock(config, MonotonicClock::new())
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Create a full bucket reading time from `clock`.
    pub fn with_clock(config: TokenBucketConfig, clock: C) -> Result<Self> {
        config.validate()?;
        info!(
            capacity = config.capacity,
            refill_per_second = config.refill_per_second,
            "Token bucket created"
        );
        let state = AtomicSnapshot::new(BucketSnapshot::new(config.capacity, clock.now_millis()));
        Ok(Self {
            config,
            state,
            clock,
        })
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Take `tokens` from the bucket. Returns `true` if there were enough.
    ///
    /// A failed attempt leaves the bucket untouched, refill clock included,
    /// so denied callers do not delay the next refill.
    pub fn try_acquire(&self, tokens: u64) -> bool {
        if tokens == 0 {
            return true;
        }

        let now = self.clock.now_millis();
        let admitted = self.state.try_transition(|current| {
            let refilled = self.refill(current, now);
            (refilled.level >= tokens)
                .then(|| BucketSnapshot::new(refilled.level - tokens, refilled.stamp_ms))
        });

        trace!(tokens = tokens, admitted = admitted, "Token bucket decision");
        admitted
    }

    /// Tokens available right now. Does not modify the bucket.
    pub fn available_tokens(&self) -> u64 {
        self.refill(self.state.load(), self.clock.now_millis()).level
    }

    /// Refill the bucket to capacity.
    pub fn reset(&self) {
        self.state.store(BucketSnapshot::new(
            self.config.capacity,
            self.clock.now_millis(),
        ));
    }

    /// Credit the tokens earned between `current.stamp_ms` and `now`.
    ///
    /// Tokens beyond capacity are discarded.
    fn refill(&self, current: BucketSnapshot, now: u64) -> BucketSnapshot {
        let now = now.max(current.stamp_ms);
        let earned = units_between(current.stamp_ms, now, self.config.refill_per_second);
        let level = current.level.saturating_add(earned).min(self.config.capacity);
        BucketSnapshot::new(level, now)
    }
}

impl<C: Clock> RateLimiter for TokenBucket<C> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }

    fn try_acquire(&self, _key: Option<&str>, cost: u64) -> bool {
        TokenBucket::try_acquire(self, cost)
    }

    fn current_level(&self, _key: Option<&str>) -> u64 {
        self.available_tokens()
    }

    fn reset(&self, _key: Option<&str>) {
        TokenBucket::reset(self)
    }
}
