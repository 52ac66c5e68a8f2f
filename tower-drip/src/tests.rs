use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use drip_limit::LeakConfig;
use drip_limit::LeakyBucket;
use quanta::Clock;
use quanta::Mock;
use tokio::time::Instant;
use tokio::time::advance;
use tokio::time::pause;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;

use super::*;

use futures::future::Ready;
use futures::future::ready;

#[derive(Clone, Debug)]
struct MockService {
    pub count: Arc<AtomicUsize>,
}

impl MockService {
    fn new() -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Service<()> for MockService {
    type Response = ();
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ()) -> Self::Future {
        self.count.fetch_add(1, Ordering::SeqCst);
        ready(Ok(()))
    }
}

// An inner service whose every call fails
#[derive(Clone, Debug)]
struct FailingService;

impl Service<()> for FailingService {
    type Response = ();
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ()) -> Self::Future {
        ready(Err("database unavailable".into()))
    }
}

// A throttle over a bucket whose clock only moves when the test says so
fn mocked(capacity: usize, interval: Duration) -> (Throttle, Arc<Mock>) {
    let (clock, mock) = Clock::mock();
    let config = LeakConfig::new(capacity, 1.0, interval).unwrap();
    let bucket = LeakyBucket::with_clock(config, clock);
    (Throttle::new(Arc::new(bucket)), mock)
}

// Moves the bucket's clock and tokio's paused clock together
async fn tick(mock: &Mock, by: Duration) {
    mock.increment(by);
    advance(by).await;
}

#[tokio::test]
async fn test_run_returns_work_output() {
    let (throttle, _mock) = mocked(2, Duration::from_secs(60));

    assert_eq!(throttle.run(async { 42 }).await, Ok(42));

    let failed = throttle.run(async { Err::<(), _>("boom") }).await;
    assert_eq!(failed, Ok(Err("boom")));

    // The failing work still spent its slot
    assert_eq!(throttle.status().level, 2);
}

#[tokio::test]
async fn test_run_waits_for_a_slot() {
    pause();
    let interval = Duration::from_millis(100);
    let (throttle, mock) = mocked(1, interval);

    throttle.run(async {}).await.unwrap();

    let start = Instant::now();
    let mut waiting = pin!(throttle.run(async { 42 }));
    assert!(futures::poll!(waiting.as_mut()).is_pending());

    tick(&mock, interval).await;

    assert_eq!(waiting.await, Ok(42));
    assert_eq!(start.elapsed(), interval);
}

#[tokio::test]
async fn test_run_times_out_without_running_work() {
    pause();
    let (throttle, _mock) = mocked(1, Duration::from_secs(60));
    let throttle = throttle.with_timeout(Duration::from_millis(50));
    throttle.run(async {}).await.unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = ran.clone();
    let start = Instant::now();
    let res = throttle
        .run(async move { ran_clone.store(true, Ordering::SeqCst) })
        .await;

    assert_eq!(res, Err(ThrottleError::Timeout));
    assert_eq!(start.elapsed(), Duration::from_millis(50));
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_close_wakes_waiters() {
    pause();
    let (throttle, _mock) = mocked(1, Duration::from_secs(60));
    throttle.acquire().await.unwrap();

    let waiter = throttle.clone();
    let handle = tokio::spawn(async move { waiter.acquire().await });

    tokio::task::yield_now().await;
    throttle.close();

    let res = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("close should wake the waiter")
        .expect("Task panicked");
    assert_eq!(res, Err(ThrottleError::Closed));
    assert_eq!(throttle.run(async {}).await, Err(ThrottleError::Closed));
}

#[tokio::test]
async fn test_dropped_wait_spends_nothing() {
    pause();
    let (throttle, _mock) = mocked(1, Duration::from_secs(60));
    throttle.acquire().await.unwrap();

    let res = tokio::time::timeout(Duration::from_millis(20), throttle.acquire()).await;

    assert!(res.is_err(), "Should still be waiting");
    assert_eq!(throttle.status().level, 1);
}

#[tokio::test]
async fn test_poll_ready_backpressure() {
    pause();
    let interval = Duration::from_millis(100);
    let (throttle, mock) = mocked(2, interval);
    let mut service = ThrottleService::new(MockService::new(), throttle);

    service.ready().await.unwrap();
    service.call(()).await.unwrap();

    service.ready().await.unwrap();
    service.call(()).await.unwrap();

    // 1. This poll must stay Pending
    let mut ready_fut = ServiceExt::<()>::ready(&mut service);
    assert!(futures::poll!(&mut ready_fut).is_pending());

    // 2. One interval later a slot has leaked away
    tick(&mock, interval).await;
    tokio::time::timeout(Duration::from_secs(1), ready_fut)
        .await
        .expect("Should recover")
        .expect("Service should stay healthy");
    service.call(()).await.unwrap();
}

#[tokio::test]
async fn test_close_wakes_a_sleeping_service() {
    pause();
    let (throttle, _mock) = mocked(1, Duration::from_secs(30));
    let mut service = ThrottleService::new(MockService::new(), throttle.clone());

    service.ready().await.unwrap().call(()).await.unwrap();

    // The bucket is full, so this service goes to sleep for a whole interval
    let handle =
        tokio::spawn(async move { ServiceExt::<()>::ready(&mut service).await.map(|_| ()) });
    tokio::task::yield_now().await;

    throttle.close();

    let err = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("close should wake the service")
        .expect("Task panicked")
        .expect_err("Should be closed");
    assert_eq!(err.downcast_ref::<ThrottleError>(), Some(&ThrottleError::Closed));
}

#[cfg(debug_assertions)]
#[tokio::test]
#[should_panic(expected = "poll_ready must report readiness before call")]
async fn test_call_without_readiness_is_rejected() {
    let (throttle, _mock) = mocked(1, Duration::from_secs(60));
    let mut service = ThrottleService::new(MockService::new(), throttle);

    let _ = service.call(());
}

#[tokio::test]
async fn test_layer_integration() {
    let mock = MockService::new();
    let count = mock.count.clone();
    let (throttle, _clock) = mocked(100, Duration::from_secs(1));

    let mut service = tower::ServiceBuilder::new()
        .layer(ThrottleLayer::new(throttle))
        .service(mock);

    service.ready().await.unwrap().call(()).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shared_state_across_clones() {
    let (throttle, _mock) = mocked(1, Duration::from_secs(10));
    let layer = ThrottleLayer::new(throttle);

    let mut svc1 = layer.layer(MockService::new());
    let mut svc2 = layer.layer(MockService::new());

    svc1.ready().await.unwrap().call(()).await.unwrap();

    // svc2 should now be throttled because svc1 used the slot
    assert!(futures::poll!(ServiceExt::<()>::ready(&mut svc2)).is_pending());
}

#[tokio::test]
async fn test_timeout_is_reported_as_error() {
    pause();
    let (throttle, _mock) = mocked(1, Duration::from_secs(60));
    let throttle = throttle.with_timeout(Duration::from_millis(30));
    let mut service = ThrottleLayer::new(throttle).layer(MockService::new());

    service.ready().await.unwrap().call(()).await.unwrap();

    let err = ServiceExt::<()>::ready(&mut service)
        .await
        .expect_err("Should time out");
    assert_eq!(err.downcast_ref::<ThrottleError>(), Some(&ThrottleError::Timeout));
}

#[tokio::test]
async fn test_closed_bucket_is_reported_as_error() {
    let (throttle, _mock) = mocked(5, Duration::from_secs(1));
    throttle.close();
    let mut service = ThrottleLayer::new(throttle).layer(MockService::new());

    let err = ServiceExt::<()>::ready(&mut service)
        .await
        .expect_err("Should be closed");
    assert_eq!(err.downcast_ref::<ThrottleError>(), Some(&ThrottleError::Closed));
}

#[tokio::test]
async fn test_inner_errors_pass_through() {
    let (throttle, _mock) = mocked(2, Duration::from_secs(60));
    let mut service = ThrottleLayer::new(throttle.clone()).layer(FailingService);

    let err = service
        .ready()
        .await
        .unwrap()
        .call(())
        .await
        .expect_err("Inner service fails");

    assert!(err.downcast_ref::<ThrottleError>().is_none());
    assert_eq!(err.to_string(), "database unavailable");
    assert_eq!(throttle.status().level, 1);
}

#[tokio::test]
async fn test_concurrent_hammer() {
    pause();
    let capacity = 5;
    let (throttle, _clock) = mocked(capacity, Duration::from_secs(60));
    let throttle = throttle.with_timeout(Duration::from_millis(50));

    let mock = MockService::new();
    let mock_count = mock.count.clone();
    let service = ThrottleLayer::new(throttle).layer(mock);

    let mut handles = vec![];
    for _ in 0..capacity * 4 {
        let mut svc = service.clone();
        handles.push(tokio::spawn(async move {
            svc.ready().await?.call(()).await
        }));
    }

    let mut completed = 0;
    let mut timed_out = 0;
    for h in handles {
        match h.await.expect("Task panicked") {
            Ok(()) => completed += 1,
            Err(e) if e.downcast_ref::<ThrottleError>() == Some(&ThrottleError::Timeout) => {
                timed_out += 1
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    // ASSERTION: Only exactly 'capacity' requests should have been allowed through
    assert_eq!(
        mock_count.load(Ordering::SeqCst),
        capacity,
        "Throttle allowed more/less than capacity under pressure"
    );
    assert_eq!(completed, capacity);
    assert_eq!(timed_out, capacity * 3);
}
