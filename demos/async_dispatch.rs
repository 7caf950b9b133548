use futures_conveyor::{AsyncPool, PoolConfig, Response, ShutdownMode};
use std::time::Duration;
use tracing::info;

async fn lookup(id: u32) -> String {
  tokio::time::sleep(Duration::from_millis(100 + (id as u64 % 4) * 50)).await;
  format!("record-{}", id)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Async Dispatch Example ---");

  let pool = AsyncPool::new(PoolConfig::new(3).with_name("lookup_pool"), lookup);

  // Several independent callers share one pool through cloned submitters.
  let mut callers = Vec::new();
  for caller_id in 0..3u32 {
    let submitter = pool.submitter();
    callers.push(tokio::spawn(async move {
      let mut responses: Vec<Response<String>> = Vec::new();
      for n in 0..3 {
        let id = caller_id * 10 + n;
        match submitter.submit(id).await {
          Ok(response) => responses.push(response),
          Err(e) => tracing::error!("Caller {} failed to submit {}: {}", caller_id, id, e),
        }
      }
      for response in responses {
        let request_id = response.id();
        match response.await_result().await {
          Ok(record) => info!("Caller {} got {} for request {}", caller_id, record, request_id),
          Err(e) => info!("Caller {} got error for request {}: {}", caller_id, request_id, e),
        }
      }
    }));
  }

  for caller in callers {
    caller.await.expect("Caller task failed");
  }

  let report = pool
    .shutdown(ShutdownMode::Graceful)
    .await
    .expect("Pool shutdown failed");
  info!("Pool shutdown complete: {:?}", report);
  info!("--- Async Dispatch Example End ---");
}
