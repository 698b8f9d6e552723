//! Admission-control primitives and their shared infrastructure.

mod backend;
mod fixed_window;
mod leaky_bucket;
mod registry;
mod scheduler;
mod sliding_counter;
mod sliding_log;
mod snapshot;
mod store;
mod token_bucket;

pub use backend::{Algorithm, RateLimiter};
pub use fixed_window::{FixedWindowConfig, FixedWindowLimiter};
pub use leaky_bucket::{LeakyBucket, LeakyBucketConfig};
pub use registry::LimiterRegistry;
pub use scheduler::{ResetScheduler, DEFAULT_SHUTDOWN_GRACE};
pub use sliding_counter::{SlidingCounterConfig, SlidingWindowCounter};
pub use sliding_log::{SlidingLogConfig, SlidingWindowLog};
pub use snapshot::MAX_BUCKET_CAPACITY;
pub use store::KeyedStore;
pub use token_bucket::{TokenBucket, TokenBucketConfig};
