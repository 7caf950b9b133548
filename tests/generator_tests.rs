use futures_conveyor::{generate, generate_into, generate_n, Queue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,futures_conveyor=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

fn counter() -> impl FnMut() -> std::future::Ready<u64> + Send + 'static {
  let next = Arc::new(AtomicU64::new(0));
  move || std::future::ready(next.fetch_add(1, Ordering::SeqCst))
}

#[tokio::test]
async fn test_generator_produces_until_stopped() {
  setup_tracing_for_test();
  let (values, generator) = generate(counter());

  let first = values.take(5).await;
  assert_eq!(first, vec![0, 1, 2, 3, 4]);
  assert!(!generator.is_stop_requested());

  generator.stop();
  let delivered = generator.join().await.unwrap();
  assert!(delivered >= 5);
}

#[tokio::test]
async fn test_stop_and_close_ends_stream_within_bound() {
  setup_tracing_for_test();
  let (output, values) = Queue::new(4).split();
  let generator = generate_into(counter(), output.clone());
  assert_eq!(generator.in_flight_bound(), 5);

  let _ = values.take(10).await;
  // Give the producer time to fill the queue again.
  sleep(Duration::from_millis(20)).await;
  generator.stop_and_close();

  let mut after_stop = 0;
  let drained = timeout(Duration::from_secs(1), async {
    while values.pop().await.is_some() {
      after_stop += 1;
    }
  })
  .await;

  assert!(drained.is_ok(), "reader should reach end-of-stream after stop_and_close");
  assert!(after_stop <= generator.in_flight_bound());
  assert!(output.is_closed());
  generator.join().await.unwrap();
}

#[tokio::test]
async fn test_stop_without_close_leaves_shared_queue_open() {
  setup_tracing_for_test();
  let (output, values) = Queue::new(2).split();
  let generator = generate_into(counter(), output.clone());

  assert_eq!(values.pop().await, Some(0));
  generator.stop();
  generator.join().await.unwrap();

  assert!(!output.is_closed());
  // Whatever was buffered is still readable; after that the reader would wait.
  let leftover = values.take_timeout(10, Duration::from_millis(50)).await;
  assert!(leftover.len() <= 3);
}

#[tokio::test]
async fn test_stop_then_stop_and_close_still_ends_stream() {
  setup_tracing_for_test();
  let (output, values) = Queue::new(2).split();
  let generator = generate_into(counter(), output.clone());

  assert_eq!(values.pop().await, Some(0));
  generator.stop();
  // Let the producer observe the stop and exit before the close request.
  sleep(Duration::from_millis(20)).await;
  generator.stop_and_close();

  let drained = timeout(Duration::from_secs(1), values.collect_all()).await;
  assert!(drained.is_ok(), "reader should reach end-of-stream after a late stop_and_close");
  assert!(drained.unwrap().len() <= generator.in_flight_bound());
  assert!(output.is_closed());

  // A repeated request is a no-op.
  generator.stop_and_close();
  generator.join().await.unwrap();
}

#[tokio::test]
async fn test_generator_exits_when_readers_are_gone() {
  setup_tracing_for_test();
  let (values, generator) = generate(counter());
  assert_eq!(values.pop().await, Some(0));
  drop(values);

  let delivered = timeout(Duration::from_secs(1), generator.join()).await;
  assert!(delivered.is_ok(), "generator should stop once nobody can read its output");
}

#[tokio::test]
async fn test_counted_generator_runs_exactly_n_times_and_closes() {
  setup_tracing_for_test();
  let (output, values) = Queue::new(2).split();
  let completion = generate_n(5, |i| async move { i * 10 }, output, true);

  let collected = values.collect_all().await;
  assert_eq!(collected, vec![0, 10, 20, 30, 40]);
  assert_eq!(completion.wait().await.unwrap(), 5);
}

#[tokio::test]
async fn test_counted_generator_can_leave_output_open() {
  setup_tracing_for_test();
  let (output, values) = Queue::new(8).split();
  let completion = generate_n(3, |i| async move { i }, output.clone(), false);

  assert_eq!(completion.wait().await.unwrap(), 3);
  assert!(!output.is_closed());
  assert_eq!(values.take(3).await, vec![0, 1, 2]);
}
