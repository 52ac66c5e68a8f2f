use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use drip_limit::Reason;
use drip_limit::Strategy;
use drip_limit::ThrottleError;
use tokio::sync::futures::OwnedNotified;
use tokio::time::Instant;
use tokio::time::Sleep;
use tokio::time::sleep;
use tower::BoxError;
use tower::Service;

use crate::Throttle;

enum Admission {
    Idle,
    // A full bucket sleeps until the next slot, or until the throttle is closed
    Sleeping {
        wait: Pin<Box<Sleep>>,
        closing: Pin<Box<OwnedNotified>>,
    },
    Admitted,
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Admission::Idle => f.write_str("Idle"),
            Admission::Sleeping { wait, .. } => f
                .debug_struct("Sleeping")
                .field("deadline", &wait.deadline())
                .finish_non_exhaustive(),
            Admission::Admitted => f.write_str("Admitted"),
        }
    }
}

/// Admits every request through a leaky bucket before calling the inner service.
///
/// Readiness is only reported once the bucket has admitted an item for the
/// next call. Errors from the inner service are passed through unchanged.
/// Closing the [`Throttle`] wakes a service that is sleeping on a full bucket,
/// and its `poll_ready` then fails with `ThrottleError::Closed`.
///
/// `call` spends the admission obtained by `poll_ready`, so every `call` must
/// follow a `poll_ready` that returned `Ready(Ok(()))`, as the `Service`
/// contract requires. Debug builds assert this. In release builds a `call`
/// without an admission is forwarded to the inner service without touching
/// the bucket.
#[derive(Debug)]
pub struct ThrottleService<S> {
    inner: S,
    throttle: Throttle,
    admission: Admission,
    wait_start: Option<Instant>,
}

impl<S> ThrottleService<S> {
    pub fn new(inner: S, throttle: Throttle) -> Self {
        Self {
            inner,
            throttle,
            admission: Admission::Idle,
            wait_start: None,
        }
    }

    fn admit(&mut self) -> Result<Admission, BoxError> {
        // Registered before the check so a close in between still wakes us
        let closing = self.throttle.closing();
        match self.throttle.bucket().process() {
            ControlFlow::Continue(()) => {
                self.wait_start = None;
                Ok(Admission::Admitted)
            }
            ControlFlow::Break(Reason::Closed) => {
                self.wait_start = None;
                Err(Box::new(ThrottleError::Closed))
            }
            ControlFlow::Break(Reason::Overloaded { retry_after }) => {
                let start = *self.wait_start.get_or_insert_with(Instant::now);
                let wait = self.throttle.bounded_wait(retry_after, start).inspect_err(|_| {
                    self.wait_start = None;
                })?;
                Ok(Admission::Sleeping {
                    wait: Box::pin(sleep(wait)),
                    closing,
                })
            }
        }
    }
}

// Manually implement Clone because Pin<Box<Sleep>> cannot be cloned
impl<S> Clone for ThrottleService<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            throttle: self.throttle.clone(),
            // Admissions are not shared, the clone has to obtain its own
            admission: Admission::Idle,
            wait_start: None,
        }
    }
}

impl<S, Req> Service<Req> for ThrottleService<S>
where
    S: Service<Req, Error = BoxError>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        loop {
            match &mut self.admission {
                Admission::Admitted => return self.inner.poll_ready(cx),
                Admission::Sleeping { wait, closing } => {
                    // Either way the bucket is checked again, and reports Closed
                    if closing.as_mut().poll(cx).is_pending() {
                        ready!(wait.as_mut().poll(cx));
                    }
                    self.admission = Admission::Idle;
                }
                Admission::Idle => {
                    // Check inner service readiness FIRST to avoid spending a slot
                    ready!(self.inner.poll_ready(cx))?;
                    self.admission = self.admit()?;
                }
            }
        }
    }

    /// Forwards `req` to the inner service, spending the admission from `poll_ready`.
    fn call(&mut self, req: Req) -> Self::Future {
        debug_assert!(
            matches!(self.admission, Admission::Admitted),
            "poll_ready must report readiness before call"
        );
        self.admission = Admission::Idle;
        self.inner.call(req)
    }
}
