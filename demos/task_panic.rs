use futures_conveyor::{AsyncPool, FailurePolicy, PoolConfig, PoolError, ShutdownMode};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let pool = AsyncPool::new(
    PoolConfig::new(1)
      .with_name("panic_pool")
      .with_failure_policy(FailurePolicy::Suppress),
    |should_panic: bool| async move {
      tokio::time::sleep(Duration::from_millis(100)).await;
      if should_panic {
        info!("Panicking Task: About to panic!");
        panic!("This task is designed to panic!");
      }
      "Survived".to_string()
    },
  );

  let doomed = pool.submit(true).await.expect("Failed to submit panicking task");
  let healthy = pool.submit(false).await.expect("Failed to submit normal task");

  match doomed.await_result().await {
    Err(PoolError::TaskPanicked) => info!("Panicking task reported TaskPanicked, as expected."),
    other => info!("Unexpected result for panicking task: {:?}", other),
  }
  match healthy.await_result().await {
    Ok(result) => info!("Normal task after the panic: {}", result),
    Err(e) => info!("Normal task failed: {:?}", e),
  }

  let report = pool
    .shutdown(ShutdownMode::Graceful)
    .await
    .expect("Pool shutdown failed");
  info!("Pool shutdown complete: {:?}", report);
  info!("--- Task Panic Example End ---");
}
