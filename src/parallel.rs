//! Parallel mapping on top of [`WorkerPool`].
//!
//! The ordered functions tag every element with its position ([`Indexed`]),
//! run the tagged values through a self-closing pool and write each result back
//! into a pre-sized container at its original index. The streaming functions
//! skip the bookkeeping and hand out the pool's output queue directly.

use crate::config::PoolConfig;
use crate::handle::Completion;
use crate::queue::{Queue, QueueConsumer};
use crate::task::Indexed;
use crate::worker::{PoolReport, WorkerPool};

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use tracing::{debug, error};

/// Maps `items` through `transform` on up to `concurrency` executors.
///
/// The output has the same length and order as the input, whatever order the
/// executors finish in.
///
/// # Panics
/// Panics if `concurrency` is zero, and re-raises a panic from `transform`.
pub async fn parallel_map<T, U, F, Fut>(transform: F, concurrency: usize, items: Vec<T>) -> Vec<U>
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = U> + Send + 'static,
{
  let pool = WorkerPool::new(PoolConfig::new(concurrency).with_name("parallel_map"));
  parallel_map_with(&pool, transform, items).await
}

/// [`parallel_map`] over a borrowed slice.
pub async fn parallel_map_cloned<T, U, F, Fut>(transform: F, concurrency: usize, items: &[T]) -> Vec<U>
where
  T: Clone + Send + 'static,
  U: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = U> + Send + 'static,
{
  parallel_map(transform, concurrency, items.to_vec()).await
}

/// [`parallel_map`] on a caller-configured pool.
///
/// When the pool suppresses failures, elements whose transform panicked are
/// left out; the remaining results keep their relative order.
pub async fn parallel_map_with<T, U, F, Fut>(pool: &WorkerPool, transform: F, items: Vec<T>) -> Vec<U>
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = U> + Send + 'static,
{
  if items.is_empty() {
    return Vec::new();
  }
  let len = items.len();
  let depth = pool.config().queue_capacity();
  debug!(pool_name = %pool.name(), len, "Ordered parallel map started.");

  let (feeder, tasks) = Queue::new(depth).split();
  let (results_tx, results) = Queue::new(depth).split();

  let finisher = pool.spawn_and_close(tasks, results_tx, move |task: Indexed<T>| {
    let index = task.index;
    let pending = transform(task.value);
    async move { Indexed::new(index, pending.await) }
  });

  let feeding = pool.tokio_handle().spawn(async move {
    for (index, value) in items.into_iter().enumerate() {
      if feeder.push(Indexed::new(index, value)).await.is_err() {
        break;
      }
    }
    let _ = feeder.close();
  });

  let mut slots: Vec<Option<U>> = std::iter::repeat_with(|| None).take(len).collect();
  while let Some(Indexed { index, value }) = results.pop().await {
    slots[index] = Some(value);
  }

  if let Err(e) = finisher.wait().await {
    error!(pool_name = %pool.name(), "Ordered parallel map lost its pool: {}", e);
  }
  let _ = feeding.await;

  let assembled: Vec<U> = slots.into_iter().flatten().collect();
  debug!(pool_name = %pool.name(), len, assembled = assembled.len(), "Ordered parallel map finished.");
  assembled
}

/// Maps every entry of `input` through `transform` in parallel and collects
/// the returned pairs into a new map. Later duplicates of an output key win in
/// completion order.
pub async fn parallel_map_map<K1, V1, K2, V2, F, Fut>(
  transform: F,
  concurrency: usize,
  input: HashMap<K1, V1>,
) -> HashMap<K2, V2>
where
  K1: Send + 'static,
  V1: Send + 'static,
  K2: Eq + Hash + Send + 'static,
  V2: Send + 'static,
  F: Fn(K1, V1) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = (K2, V2)> + Send + 'static,
{
  let len = input.len();
  let (results, finisher) =
    parallel_map_stream_with_finisher(move |(key, value): (K1, V1)| transform(key, value), concurrency, input);

  let mut out = HashMap::with_capacity(len);
  while let Some((key, value)) = results.pop().await {
    out.insert(key, value);
  }
  if let Err(e) = finisher.wait().await {
    error!("Keyed parallel map lost its pool: {}", e);
  }
  out
}

/// Streams `items` through `transform` and returns the live, unordered result
/// queue. The queue closes after the last result.
pub fn parallel_map_stream<T, U, F, Fut, I>(transform: F, concurrency: usize, items: I) -> QueueConsumer<U>
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = U> + Send + 'static,
  I: IntoIterator<Item = T>,
{
  let (results, _finisher) = parallel_map_stream_with_finisher(transform, concurrency, items);
  results
}

/// Like [`parallel_map_stream`], also returning a [`Completion`] that resolves
/// once no more results will arrive.
pub fn parallel_map_stream_with_finisher<T, U, F, Fut, I>(
  transform: F,
  concurrency: usize,
  items: I,
) -> (QueueConsumer<U>, Completion<PoolReport>)
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = U> + Send + 'static,
  I: IntoIterator<Item = T>,
{
  let pool = WorkerPool::new(PoolConfig::new(concurrency).with_name("parallel_map_stream"));
  let tasks = Queue::feed_from(items);
  let (results_tx, results) = Queue::new(pool.config().queue_capacity()).split();
  let finisher = pool.spawn_and_close(tasks, results_tx, transform);
  (results, finisher)
}
