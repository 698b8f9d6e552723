//! Single-register bucket state.
//!
//! Leaky and token buckets keep their whole state, a level plus the time it
//! was last brought up to date, in one `AtomicU64`. A transition reads the
//! packed value, computes a candidate and installs it with compare-and-swap;
//! a lost race retries against the value that won.
//!
//! Layout: the high 24 bits hold the level, the low 40 bits hold the stamp in
//! milliseconds since the limiter's clock origin (about 34 years of range).

use std::sync::atomic::{AtomicU64, Ordering};

const STAMP_BITS: u32 = 40;
const STAMP_MASK: u64 = (1 << STAMP_BITS) - 1;

/// Largest capacity a bucket can be configured with.
pub const MAX_BUCKET_CAPACITY: u64 = (1 << (64 - STAMP_BITS)) - 1;

/// Decoded bucket state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BucketSnapshot {
    /// Water held (leaky) or tokens available (token).
    pub level: u64,
    /// Milliseconds since clock origin when `level` was last accounted.
    pub stamp_ms: u64,
}

impl BucketSnapshot {
    pub fn new(level: u64, stamp_ms: u64) -> Self {
        Self {
            level: level.min(MAX_BUCKET_CAPACITY),
            stamp_ms: stamp_ms.min(STAMP_MASK),
        }
    }

    #[inline]
    fn pack(self) -> u64 {
        (self.level << STAMP_BITS) | (self.stamp_ms & STAMP_MASK)
    }

    #[inline]
    fn unpack(raw: u64) -> Self {
        Self {
            level: raw >> STAMP_BITS,
            stamp_ms: raw & STAMP_MASK,
        }
    }
}

/// Atomically swappable [`BucketSnapshot`].
#[derive(Debug)]
pub(crate) struct AtomicSnapshot {
    raw: AtomicU64,
}

impl AtomicSnapshot {
    pub fn new(initial: BucketSnapshot) -> Self {
        Self {
            raw: AtomicU64::new(initial.pack()),
        }
    }

    pub fn load(&self) -> BucketSnapshot {
        BucketSnapshot::unpack(self.raw.load(Ordering::Acquire))
    }

    /// Unconditionally replace the state.
    pub fn store(&self, snapshot: BucketSnapshot) {
        self.raw.store(snapshot.pack(), Ordering::Release);
    }

    /// Apply `transition` until it commits or declines.
    ///
    /// `transition` returns the next state to admit, or `None` to deny. On
    /// `None` nothing is written. The return value is whether a candidate
    /// was committed; it never depends on the resulting level.
    pub fn try_transition(
        &self,
        mut transition: impl FnMut(BucketSnapshot) -> Option<BucketSnapshot>,
    ) -> bool {
        self.raw
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                transition(BucketSnapshot::unpack(raw)).map(|next| {
                    BucketSnapshot::new(next.level, next.stamp_ms).pack()
                })
            })
            .is_ok()
    }
}

/// Whole units accrued at `per_second` between the clock origin and `at_ms`.
///
/// Buckets credit `accrued_units(now) - accrued_units(stamp)` and then move
/// their stamp to `now`. The differences telescope, so however often a
/// bucket is touched the credit over any span never drifts from the
/// configured rate, and no sub-millisecond remainder has to be stored.
#[inline]
pub(crate) fn accrued_units(at_ms: u64, per_second: f64) -> u64 {
    (at_ms as f64 * per_second / 1000.0).floor() as u64
}

/// Units accrued between `from_ms` and `to_ms`.
#[inline]
pub(crate) fn units_between(from_ms: u64, to_ms: u64, per_second: f64) -> u64 {
    accrued_units(to_ms, per_second).saturating_sub(accrued_units(from_ms, per_second))
}
