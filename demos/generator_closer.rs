use futures_conveyor::{generate, PoolConfig, WorkerPool};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Generator Closer Example ---");

  let mut tick = 0u64;
  let (ticks, generator) = generate(move || {
    tick += 1;
    let value = tick;
    async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      value
    }
  });

  // Square the ticks on a small pool while the generator keeps producing.
  let pool = WorkerPool::new(PoolConfig::new(2).with_name("squares"));
  let squares = pool.spawn_background(ticks, |v: u64| async move { v * v });

  for _ in 0..5 {
    if let Some(square) = squares.pop().await {
      info!("Square: {}", square);
    }
  }

  info!(
    "Stopping generator; up to {} more values may still arrive.",
    generator.in_flight_bound()
  );
  generator.stop_and_close();

  while let Some(square) = squares.pop().await {
    info!("Late square: {}", square);
  }
  let delivered = generator.join().await.expect("Generator failed");
  info!("Generator delivered {} values in total.", delivered);
  info!("--- Generator Closer Example End ---");
}
