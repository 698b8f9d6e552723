//! Ratekeeper - In-process Admission Control
//!
//! This crate implements five independent rate limiting primitives that
//! decide, per unit of work, whether to admit or reject it. Every limiter is
//! safe to share across threads and keeps its hot path free of blocking
//! locks: bucket state lives in a single atomically swapped snapshot, window
//! counters are advanced with compare-and-swap loops.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::RatekeeperConfig;
pub use error::{RatekeeperError, Result};
pub use ratelimit::{Algorithm, LimiterRegistry, RateLimiter};
