use std::ops::ControlFlow;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use quanta::Clock;
use tracing::debug;
use tracing::trace;

use crate::LeakConfig;
use crate::Reason;
use crate::Status;
use crate::Strategy;
use crate::ThrottleError;

#[derive(Debug)]
struct BucketState {
    level: usize,
    last_drain: quanta::Instant,
    /// Leakage not yet applied to `level`, in items scaled by the interval's
    /// nanoseconds. Always less than one whole item.
    carry: u128,
}

/// A leaky bucket throttler.
///
/// Each admission adds one item to the bucket and the bucket leaks
/// `leak_quantity` items every `leak_interval`. Callers are blocked while the
/// bucket holds `capacity` items.
///
/// Blocked callers are woken in no particular order.
#[derive(Debug)]
pub struct LeakyBucket {
    config: LeakConfig,
    state: Mutex<BucketState>,
    waiters: Condvar,
    closed: AtomicBool,
    clock: Clock,
}

impl LeakyBucket {
    /// Creates an empty bucket reading time from the system's monotonic clock.
    pub fn new(config: LeakConfig) -> Self {
        Self::with_clock(config, Clock::new())
    }

    /// Creates an empty bucket reading time from `clock`.
    pub fn with_clock(config: LeakConfig, clock: Clock) -> Self {
        let now = clock.now();
        Self {
            config,
            state: Mutex::new(BucketState {
                level: 0,
                last_drain: now,
                carry: 0,
            }),
            waiters: Condvar::new(),
            closed: AtomicBool::new(false),
            clock,
        }
    }

    pub fn config(&self) -> &LeakConfig {
        &self.config
    }

    /// Applies the leakage accumulated since the previous drain.
    pub fn drain(&self) {
        let mut state = self.lock();
        self.leak(&mut state);
    }

    /// Waits until the bucket has room, admits one item and then runs `work`.
    ///
    /// Whatever `work` returns is passed back unchanged. The slot is spent even
    /// if `work` fails.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::Closed`] if the bucket is closed before the
    /// item could be admitted. `work` is not run in that case.
    pub fn run<F, T>(&self, work: F) -> Result<T, ThrottleError>
    where
        F: FnOnce() -> T,
    {
        self.admit(None)?;
        Ok(work())
    }

    /// As [`LeakyBucket::run`], but gives up once `timeout` has passed without
    /// an admission.
    ///
    /// The timeout bounds real waiting time, whatever clock the bucket reads.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::Timeout`] when the deadline passes, or
    /// [`ThrottleError::Closed`] if the bucket is closed first.
    pub fn run_with_timeout<F, T>(&self, timeout: Duration, work: F) -> Result<T, ThrottleError>
    where
        F: FnOnce() -> T,
    {
        let deadline = Instant::now().checked_add(timeout);
        self.admit(deadline)?;
        Ok(work())
    }

    /// Reports the state of the bucket after draining it. Never waits.
    pub fn status(&self) -> Status {
        let mut state = self.lock();
        self.leak(&mut state);

        let next_slot =
            (state.level >= self.config.capacity()).then(|| self.time_to_next_slot(&state));

        Status {
            capacity: self.config.capacity(),
            leak_quantity: self.config.leak_quantity(),
            leak_interval: self.config.leak_interval(),
            level: state.level,
            next_slot,
        }
    }

    /// Refuses all further admissions and releases every blocked caller.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Waiters check the flag under the lock, so taking it here means none
        // of them can miss the notification.
        let _state = self.lock();
        self.waiters.notify_all();
        debug!("bucket closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        // The state is consistent after every statement, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn leak(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_drain).as_nanos();
        let interval = self.config.leak_interval().as_nanos();

        // Whole items leak out, the remainder is carried to the next drain.
        let leakage = elapsed
            .saturating_mul(self.config.leak_quantity() as u128)
            .saturating_add(state.carry);
        let whole = usize::try_from(leakage / interval).unwrap_or(usize::MAX);

        state.carry = leakage % interval;
        state.level = state.level.saturating_sub(whole);
        state.last_drain = now;

        trace!(level = state.level, carry = state.carry, "drained bucket");
    }

    fn time_to_next_slot(&self, state: &BucketState) -> Duration {
        let elapsed = self.clock.now().saturating_duration_since(state.last_drain);
        self.config.leak_interval().saturating_sub(elapsed)
    }

    fn admit(&self, deadline: Option<Instant>) -> Result<(), ThrottleError> {
        let mut state = self.lock();
        self.leak(&mut state);

        let mut state = self.wait_for_capacity(state, deadline)?;
        state.level += 1;
        trace!(level = state.level, "admitted item");
        Ok(())
    }

    fn wait_for_capacity<'a>(
        &'a self,
        mut state: MutexGuard<'a, BucketState>,
        deadline: Option<Instant>,
    ) -> Result<MutexGuard<'a, BucketState>, ThrottleError> {
        loop {
            if self.is_closed() {
                return Err(ThrottleError::Closed);
            }
            if state.level < self.config.capacity() {
                return Ok(state);
            }

            let mut wait = self.time_to_next_slot(&state);
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    debug!(level = state.level, "timed out waiting for capacity");
                    return Err(ThrottleError::Timeout);
                }
                wait = wait.min(remaining);
            }

            if !wait.is_zero() {
                debug!(level = state.level, ?wait, "bucket full, waiting");
                state = match self.waiters.wait_timeout(state, wait) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
            self.leak(&mut state);
        }
    }

    #[cfg(test)]
    fn carry(&self) -> u128 {
        self.lock().carry
    }
}

impl Strategy for LeakyBucket {
    fn process(&self) -> ControlFlow<Reason> {
        if self.is_closed() {
            return ControlFlow::Break(Reason::Closed);
        }

        let mut state = self.lock();
        self.leak(&mut state);

        if state.level < self.config.capacity() {
            state.level += 1;
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(Reason::Overloaded {
                retry_after: self.time_to_next_slot(&state),
            })
        }
    }
}
