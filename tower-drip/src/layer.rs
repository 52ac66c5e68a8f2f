use tower::Layer;

use crate::Throttle;
use crate::ThrottleService;

/// Applies leaky bucket throttling to requests.
#[derive(Clone, Debug)]
pub struct ThrottleLayer {
    throttle: Throttle,
}

impl ThrottleLayer {
    /// Create a ThrottleLayer
    ///
    /// Every service produced by this layer draws from the same bucket and
    /// honours the throttle's timeout.
    pub fn new(throttle: Throttle) -> Self {
        ThrottleLayer { throttle }
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = ThrottleService<S>;

    fn layer(&self, service: S) -> Self::Service {
        ThrottleService::new(service, self.throttle.clone())
    }
}
