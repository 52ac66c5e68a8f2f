//! # Tower Drip
//!
//! `tower-drip` puts a [`drip_limit::LeakyBucket`] in front of async work.
//!
//! ## Front Ends
//!
//! 1. **[`Throttle`]**: An awaitable handle. [`Throttle::run`] waits until the
//!    bucket has room, then drives the supplied future and returns its output.
//! 2. **[`ThrottleLayer`]**: A [Tower](https://github.com/tower-rs/tower) layer.
//!    The produced [`ThrottleService`] only reports readiness once the bucket has
//!    admitted the next request.
//!
//! Both honour an optional wait timeout (`ThrottleError::Timeout`) and the
//! bucket being closed (`ThrottleError::Closed`). In a `tower` stack these are
//! boxed into [`tower::BoxError`]; errors from the inner service pass through
//! untouched.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use drip_limit::LeakConfig;
//! use drip_limit::LeakyBucket;
//! use tower_drip::Throttle;
//!
//! # #[tokio::main] async fn main() {
//! let config = LeakConfig::new(10, 2.0, Duration::from_secs(1)).unwrap();
//! let throttle = Throttle::new(Arc::new(LeakyBucket::new(config)))
//!     .with_timeout(Duration::from_secs(5));
//!
//! let body = throttle.run(async { "fetched" }).await.unwrap();
//! assert_eq!(body, "fetched");
//! # }
//! ```

mod layer;
mod service;
mod throttle;

#[cfg(test)]
mod tests;

pub use drip_limit::ThrottleError;
pub use layer::ThrottleLayer;
pub use service::ThrottleService;
pub use throttle::Throttle;
