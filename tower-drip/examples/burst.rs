use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use drip_limit::LeakConfig;
use drip_limit::LeakyBucket;
use tokio::task::JoinSet;
use tower::BoxError;
use tower_drip::Throttle;

async fn fetch(id: usize) -> Result<usize, BoxError> {
    // Simulate a slow upstream call
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(id)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Burst of 5, then 2 requests every 500ms
    let config = LeakConfig::from_secs_f64(5, 2.0, 0.5)?;
    let throttle = Throttle::new(Arc::new(LeakyBucket::new(config)))
        .with_timeout(Duration::from_secs(3));

    let start = Instant::now();
    let mut tasks = JoinSet::new();
    for id in 0..15 {
        let throttle = throttle.clone();
        tasks.spawn(async move { (id, throttle.run(fetch(id)).await) });
    }

    while let Some(task) = tasks.join_next().await {
        let (id, res) = task?;
        match res {
            Ok(Ok(_)) => println!("{:>6.2?}  request {:>2} done", start.elapsed(), id),
            Ok(Err(e)) => println!("{:>6.2?}  request {:>2} failed: {}", start.elapsed(), id, e),
            Err(e) => println!("{:>6.2?}  request {:>2} rejected: {}", start.elapsed(), id, e),
        }
    }

    println!();
    println!("{}", throttle.status());
    Ok(())
}
