//! Error types for Ratekeeper.

use thiserror::Error;

/// Main error type for Ratekeeper operations.
///
/// Admission checks never produce one of these: a denied request is a plain
/// `false`. Errors come from construction, configuration and lifecycle misuse.
#[derive(Error, Debug)]
pub enum RatekeeperError {
    /// A limiter parameter is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The limiter's background resources were already released
    #[error("Limiter has been shut down")]
    ShutDown,

    /// Background work requested without an async runtime
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RatekeeperError>;

/// Fail with [`RatekeeperError::InvalidArgument`] unless `condition` holds.
pub(crate) fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(RatekeeperError::InvalidArgument(message()))
    }
}
