use futures_conveyor::{
  parallel_map, parallel_map_cloned, parallel_map_map, parallel_map_stream, parallel_map_stream_with_finisher,
  parallel_map_with, FailurePolicy, PoolConfig, WorkerPool,
};
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,futures_conveyor=debug"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

async fn random_delay(max_ms: u64) {
  let ms = rand::rng().random_range(0..=max_ms);
  sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_output_order_matches_input_order() {
  setup_tracing_for_test();
  let inputs: Vec<u64> = (0..100).collect();

  let outputs = parallel_map(
    |v: u64| async move {
      random_delay(10).await;
      format!("item-{v}")
    },
    8,
    inputs.clone(),
  )
  .await;

  let expected: Vec<String> = inputs.iter().map(|v| format!("item-{v}")).collect();
  assert_eq!(outputs, expected);
}

#[tokio::test]
async fn test_reverse_finishing_order_is_undone() {
  setup_tracing_for_test();
  // Earlier elements sleep longer, so completion order is the reverse of input order.
  let outputs = parallel_map(
    |v: u64| async move {
      sleep(Duration::from_millis((5 - v) * 10)).await;
      v * 2
    },
    5,
    vec![0, 1, 2, 3, 4],
  )
  .await;
  assert_eq!(outputs, vec![0, 2, 4, 6, 8]);
}

#[tokio::test]
async fn test_empty_input_yields_empty_output() {
  setup_tracing_for_test();
  let outputs: Vec<i32> = parallel_map(|v: i32| async move { v }, 3, Vec::new()).await;
  assert!(outputs.is_empty());
}

#[tokio::test]
async fn test_single_executor_still_preserves_order() {
  setup_tracing_for_test();
  let outputs = parallel_map(|v: i32| async move { -v }, 1, vec![3, 1, 2]).await;
  assert_eq!(outputs, vec![-3, -1, -2]);
}

#[tokio::test]
async fn test_cloned_variant_leaves_input_untouched() {
  setup_tracing_for_test();
  let words = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
  let lengths = parallel_map_cloned(|w: String| async move { w.len() }, 2, &words).await;
  assert_eq!(lengths, vec![5, 4, 5]);
  assert_eq!(words.len(), 3);
}

#[tokio::test]
async fn test_suppressing_pool_omits_failed_elements_in_order() {
  setup_tracing_for_test();
  let pool = WorkerPool::new(
    PoolConfig::new(3)
      .with_name("test_parallel_suppress")
      .with_failure_policy(FailurePolicy::Suppress),
  );

  let outputs = parallel_map_with(
    &pool,
    |v: i32| async move {
      if v == 4 {
        panic!("element 4 intentionally panicked");
      }
      v * 100
    },
    (1..=6).collect(),
  )
  .await;

  assert_eq!(outputs, vec![100, 200, 300, 500, 600]);
}

#[tokio::test]
async fn test_configured_queue_capacity_still_preserves_order() {
  setup_tracing_for_test();
  let pool = WorkerPool::new(PoolConfig::new(4).with_queue_capacity(1).with_name("test_parallel_depth"));
  assert_eq!(pool.config().queue_capacity(), 1);

  let outputs = parallel_map_with(
    &pool,
    |v: u64| async move {
      random_delay(5).await;
      v + 1
    },
    (0..30).collect(),
  )
  .await;
  assert_eq!(outputs, (1..=30).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_pool_on_dedicated_runtime_maps_in_order() {
  setup_tracing_for_test();
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .worker_threads(2)
    .enable_all()
    .build()
    .unwrap();
  let pool = WorkerPool::with_handle(
    PoolConfig::new(3).with_name("test_parallel_dedicated"),
    runtime.handle().clone(),
  );

  let outputs = parallel_map_with(&pool, |v: i32| async move { v * 2 }, vec![5, 6, 7, 8]).await;
  assert_eq!(outputs, vec![10, 12, 14, 16]);

  runtime.shutdown_background();
}

#[tokio::test]
async fn test_keyed_map_transforms_every_entry() {
  setup_tracing_for_test();
  let input: HashMap<String, i32> = [("a", 1), ("b", 2), ("c", 3)]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

  let output = parallel_map_map(
    |key: String, value: i32| async move { (key.to_uppercase(), value * 10) },
    2,
    input,
  )
  .await;

  let expected: HashMap<String, i32> = [("A", 10), ("B", 20), ("C", 30)]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
  assert_eq!(output, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stream_delivers_every_result_then_ends() {
  setup_tracing_for_test();
  let results = parallel_map_stream(
    |v: u32| async move {
      random_delay(5).await;
      v + 1
    },
    4,
    0..20u32,
  );

  let mut collected = Vec::new();
  while let Some(v) = results.pop().await {
    collected.push(v);
  }
  collected.sort_unstable();
  assert_eq!(collected, (1..=20).collect::<Vec<u32>>());
}

#[tokio::test]
async fn test_stream_finisher_reports_processed_count() {
  setup_tracing_for_test();
  let (results, finisher) = parallel_map_stream_with_finisher(|v: i32| async move { v }, 2, vec![1, 2, 3]);

  let collected = results.collect_all().await;
  let report = finisher.wait().await.unwrap();

  assert_eq!(collected.len(), 3);
  assert_eq!(report.processed, 3);
}
