/// Rejected bucket configuration.
///
/// Invalid values are reported at construction and never silently corrected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A bucket with no capacity would block every caller forever.
    #[error("capacity must be greater than zero")]
    ZeroCapacity,

    /// The leak quantity truncates to zero, so a full bucket would never drain.
    #[error("leak quantity {0} truncates to zero; a full bucket would never drain")]
    ZeroLeakQuantity(f64),

    /// The leak quantity is negative or not a finite number.
    #[error("leak quantity must be a finite, non-negative number, got {0}")]
    InvalidLeakQuantity(f64),

    /// The leak interval is zero, negative or not a finite number of seconds.
    #[error("leak interval must be a positive, finite number of seconds, got {0}")]
    InvalidLeakInterval(f64),
}

/// Reasons a blocking admission gave up before the work was run.
///
/// Errors raised by the admitted work itself are never wrapped in this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ThrottleError {
    /// The caller's deadline passed while waiting for capacity.
    #[error("timed out waiting for bucket capacity")]
    Timeout,

    /// The bucket was closed before capacity became available.
    #[error("bucket is closed")]
    Closed,
}
