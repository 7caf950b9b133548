use futures_conveyor::{parallel_map, PoolConfig, Queue, WorkerPool};
use std::time::Duration;
use tracing::info;

async fn scale(value: u64) -> f64 {
  let delay_ms = 50 + (value % 3) * 100;
  info!("Unit {} starting, will sleep for {}ms", value, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  value as f64 * 1.5
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  // A self-closing pool: results arrive in completion order.
  let pool = WorkerPool::new(PoolConfig::new(4).with_name("basic_pool"));
  let input = Queue::feed_from(1..=10u64);
  let (output, results) = Queue::new(4).split();
  let completion = pool.spawn_and_close(input, output, scale);

  let mut total = 0.0;
  while let Some(value) = results.pop().await {
    info!("Received {}", value);
    total += value;
  }
  let report = completion.wait().await.expect("Pool stopped unexpectedly");
  info!("Unordered sum: {} ({} units processed)", total, report.processed);

  // The same work through an order-preserving parallel map.
  let ordered = parallel_map(scale, 4, (1..=10u64).collect()).await;
  info!("Ordered results: {:?}", ordered);
  info!("--- Basic Usage Example End ---");
}
