use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use drip_limit::LeakyBucket;
use drip_limit::Reason;
use drip_limit::Status;
use drip_limit::Strategy;
use drip_limit::ThrottleError;
use tokio::sync::Notify;
use tokio::sync::futures::OwnedNotified;
use tokio::time::Instant;
use tokio::time::sleep;
use tracing::debug;

/// An awaitable handle to a shared [`LeakyBucket`].
///
/// Clones share the bucket, the timeout and the close notification. Dropping an
/// [`acquire`](Throttle::acquire) or [`run`](Throttle::run) future cancels the
/// wait without spending a slot.
#[derive(Clone, Debug)]
pub struct Throttle {
    bucket: Arc<LeakyBucket>,
    closing: Arc<Notify>,
    timeout: Option<Duration>,
}

impl Throttle {
    pub fn new(bucket: Arc<LeakyBucket>) -> Self {
        Self {
            bucket,
            closing: Arc::new(Notify::new()),
            timeout: None,
        }
    }

    /// Bound the time spent waiting for a slot.
    ///
    /// If no slot frees up within `timeout`, waiting fails with
    /// `ThrottleError::Timeout`. The admitted work itself is not bounded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn bucket(&self) -> &Arc<LeakyBucket> {
        &self.bucket
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Waits until the bucket admits one item.
    ///
    /// The bucket is drained before every check, and a full bucket is retried
    /// once the next slot is due.
    pub async fn acquire(&self) -> Result<(), ThrottleError> {
        let start = Instant::now();
        loop {
            // Registered before the check so a close in between still wakes us.
            let closing = self.closing.notified();

            match self.bucket.process() {
                ControlFlow::Continue(()) => return Ok(()),
                ControlFlow::Break(Reason::Closed) => return Err(ThrottleError::Closed),
                ControlFlow::Break(Reason::Overloaded { retry_after }) => {
                    let wait = self.bounded_wait(retry_after, start)?;
                    debug!(?wait, "bucket full, waiting");
                    tokio::select! {
                        _ = sleep(wait) => {}
                        _ = closing => {}
                    }
                }
            }
        }
    }

    /// Waits for a slot, then drives `work` to completion and returns its output unchanged.
    ///
    /// `work` is not polled until the slot is admitted.
    pub async fn run<Fut>(&self, work: Fut) -> Result<Fut::Output, ThrottleError>
    where
        Fut: Future,
    {
        self.acquire().await?;
        Ok(work.await)
    }

    pub fn status(&self) -> Status {
        self.bucket.status()
    }

    /// Closes the bucket and wakes every task waiting through this handle or its clones.
    pub fn close(&self) {
        self.bucket.close();
        self.closing.notify_waiters();
    }

    /// Completes once [`close`](Throttle::close) is called on this handle or a clone.
    ///
    /// Calls to `close` made after this returns are seen even if it is not yet polled.
    pub(crate) fn closing(&self) -> Pin<Box<OwnedNotified>> {
        Box::pin(Arc::clone(&self.closing).notified_owned())
    }

    /// How long to sleep for `retry_after`, given a wait that began at `start`.
    pub(crate) fn bounded_wait(
        &self,
        retry_after: Duration,
        start: Instant,
    ) -> Result<Duration, ThrottleError> {
        match self.timeout {
            Some(timeout) => {
                let remaining = timeout.saturating_sub(start.elapsed());
                if remaining.is_zero() {
                    debug!(?timeout, "timed out waiting for bucket capacity");
                    return Err(ThrottleError::Timeout);
                }
                Ok(retry_after.min(remaining))
            }
            None => Ok(retry_after),
        }
    }
}
