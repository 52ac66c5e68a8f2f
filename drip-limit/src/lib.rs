//! # drip-limit
//!
//! `drip-limit` provides a leaky-bucket throttler that admits work at a bounded
//! average rate while tolerating bursts up to a fixed capacity.
//!
//! ## Core Philosophy
//!
//! Admitted items accumulate in a bucket which leaks a fixed quantity of items
//! every interval. When the bucket is full, callers are suspended until enough
//! of it has drained. Fractional leakage is carried between drains so nothing
//! is lost to integer truncation.
//!
//! ## Key Concepts
//!
//! * **Lazy Evaluation**: The bucket level is recalculated at the moment of the
//!   request, there is no background thread or timer.
//! * **Serialized Admission**: Drain, check and increment happen atomically under
//!   a single lock. Blocked callers release the lock while they wait.
//! * **Cancellable Waits**: Blocked callers can be bounded by a deadline and are
//!   released immediately when the bucket is closed.
//! * **Injected Clock**: Time is read from a [`quanta::Clock`], which can be mocked.
//! * **Strategy Trait**: A non-blocking admission interface, used by the async and
//!   `tower` front ends.
//!
//! ## Example
//!
//! ```rust
//! use drip_limit::LeakConfig;
//! use drip_limit::LeakyBucket;
//! use std::time::Duration;
//!
//! // Hold up to 5 items, leak 1 item every second.
//! let config = LeakConfig::new(5, 1.0, Duration::from_secs(1)).unwrap();
//! let bucket = LeakyBucket::new(config);
//!
//! let answer = bucket.run(|| 6 * 7).unwrap();
//! assert_eq!(answer, 42);
//!
//! println!("{}", bucket.status());
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod bucket;
mod config;
mod error;
mod status;

pub use bucket::LeakyBucket;
pub use config::LeakConfig;
pub use error::ConfigError;
pub use error::ThrottleError;
pub use status::Status;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, PartialEq)]
pub enum Reason {
    /// The bucket is full. A slot is expected to free up after `retry_after`.
    Overloaded { retry_after: Duration },
    /// The bucket has been closed and will not admit anything else.
    Closed,
}

/// Non-blocking admission.
///
/// Strategies must be `Send` and `Sync` to allow sharing across thread boundaries
/// via `Arc`.
pub trait Strategy: Debug {
    /// Attempts to admit a single request.
    ///
    /// This method never waits. On success the request has been counted against
    /// the limit.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if the request cannot be admitted right now.
    fn process(&self) -> ControlFlow<Reason>;
}
