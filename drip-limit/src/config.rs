use std::num::NonZeroUsize;
use std::time::Duration;

use crate::ConfigError;

/// Validated leaky bucket configuration.
///
/// A bucket holds at most `capacity` items and leaks `leak_quantity` items
/// every `leak_interval`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakConfig {
    capacity: NonZeroUsize,
    leak_quantity: NonZeroUsize,
    leak_interval: Duration,
}

impl LeakConfig {
    /// Creates a new `LeakConfig`.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The maximum number of items the bucket may hold.
    /// * `leak_quantity` - Items drained per interval. Fractions are truncated toward zero.
    /// * `leak_interval` - The time it takes to drain `leak_quantity` items.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any value would leave the bucket unable to
    /// admit or drain.
    pub fn new(
        capacity: usize,
        leak_quantity: f64,
        leak_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(ConfigError::ZeroCapacity)?;

        if !leak_quantity.is_finite() || leak_quantity < 0.0 {
            return Err(ConfigError::InvalidLeakQuantity(leak_quantity));
        }
        let leak_quantity = NonZeroUsize::new(leak_quantity.trunc() as usize)
            .ok_or(ConfigError::ZeroLeakQuantity(leak_quantity))?;

        if leak_interval.is_zero() {
            return Err(ConfigError::InvalidLeakInterval(0.0));
        }

        Ok(Self {
            capacity,
            leak_quantity,
            leak_interval,
        })
    }

    /// Creates a new `LeakConfig` with the interval given in fractional seconds.
    ///
    /// # Errors
    ///
    /// As [`LeakConfig::new`], plus [`ConfigError::InvalidLeakInterval`] for
    /// negative, zero or non-finite intervals.
    pub fn from_secs_f64(
        capacity: usize,
        leak_quantity: f64,
        leak_interval_secs: f64,
    ) -> Result<Self, ConfigError> {
        let leak_interval = Duration::try_from_secs_f64(leak_interval_secs)
            .map_err(|_| ConfigError::InvalidLeakInterval(leak_interval_secs))?;
        if leak_interval.is_zero() {
            return Err(ConfigError::InvalidLeakInterval(leak_interval_secs));
        }
        Self::new(capacity, leak_quantity, leak_interval)
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn leak_quantity(&self) -> usize {
        self.leak_quantity.get()
    }

    pub fn leak_interval(&self) -> Duration {
        self.leak_interval
    }
}
