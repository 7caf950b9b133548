use crate::config::{FailurePolicy, PoolConfig};
use crate::error::PushError;
use crate::handle::Completion;
use crate::queue::{Queue, QueueConsumer, QueueProducer};

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle as TokioHandle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Totals reported by a pool once every executor has exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
  /// Units for which the transform returned a result.
  pub processed: u64,
  /// Units whose transform panicked under [`FailurePolicy::Suppress`].
  pub failed: u64,
}

#[derive(Debug, Default)]
struct ExecutorStats {
  processed: u64,
  failed: u64,
}

/// Outcome of joining every executor of one pool run.
#[derive(Default)]
struct JoinedExecutors {
  report: PoolReport,
  panic: Option<Box<dyn Any + Send + 'static>>,
}

impl JoinedExecutors {
  /// Returns the report, or re-raises the first executor panic.
  fn finish(self) -> PoolReport {
    if let Some(payload) = self.panic {
      std::panic::resume_unwind(payload);
    }
    self.report
  }
}

/// A fixed-size set of executors bound to one input queue and, optionally,
/// one output queue.
///
/// Every executor repeatedly pops a task from the input, applies the transform
/// and pushes the result to the output, waiting while the output is full. An
/// executor exits once the input is closed and drained. Results arrive in
/// completion order, not submission order.
///
/// The pool is a description of *how* to run; each `run*`/`spawn*` call starts
/// a fresh set of executors. It is cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkerPool {
  pool_name: Arc<str>,
  config: PoolConfig,
  tokio_handle: TokioHandle,
}

impl WorkerPool {
  /// Creates a pool that spawns its executors on the current Tokio runtime.
  ///
  /// # Panics
  /// Panics if the configured concurrency is zero, or if called outside a
  /// Tokio runtime.
  pub fn new(config: PoolConfig) -> Self {
    Self::with_handle(config, TokioHandle::current())
  }

  /// Creates a pool that spawns its executors through `tokio_handle`.
  ///
  /// # Panics
  /// Panics if the configured concurrency is zero.
  pub fn with_handle(config: PoolConfig, tokio_handle: TokioHandle) -> Self {
    assert!(
      config.concurrency >= 1,
      "worker pool `{}` needs a concurrency of at least 1, got {}",
      config.name,
      config.concurrency
    );
    let pool_id = NEXT_POOL_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let pool_name: Arc<str> = Arc::from(format!("{}#{}", config.name, pool_id));
    debug!(pool_name = %pool_name, concurrency = config.concurrency, policy = ?config.failure_policy, "Worker pool created.");
    Self {
      pool_name,
      config,
      tokio_handle,
    }
  }

  /// Name used in logs, suffixed with a process-unique pool id.
  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn config(&self) -> &PoolConfig {
    &self.config
  }

  /// Runtime the pool spawns its executors on.
  pub(crate) fn tokio_handle(&self) -> &TokioHandle {
    &self.tokio_handle
  }

  /// Runs the pool and returns once every executor has exited.
  ///
  /// The caller keeps ownership of closing `output`.
  ///
  /// # Panics
  /// Under [`FailurePolicy::Propagate`], re-raises a transform panic after the
  /// remaining executors have drained the input.
  pub async fn run<T, U, F, Fut>(
    &self,
    input: QueueConsumer<T>,
    output: QueueProducer<U>,
    transform: F,
  ) -> PoolReport
  where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
  {
    let executors = self.spawn_executors(input, Some(output), transform);
    join_executors(&self.pool_name, executors).await.finish()
  }

  /// Runs the pool, closes `output` exactly once after every executor has
  /// exited, then returns.
  ///
  /// # Panics
  /// Panics if `output` was closed by someone else while the pool owned it, and
  /// re-raises transform panics as [`WorkerPool::run`] does. The output is
  /// closed before a transform panic is re-raised so consumers never hang.
  pub async fn run_and_close<T, U, F, Fut>(
    &self,
    input: QueueConsumer<T>,
    output: QueueProducer<U>,
    transform: F,
  ) -> PoolReport
  where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
  {
    let executors = self.spawn_executors(input, Some(output.clone()), transform);
    let joined = join_executors(&self.pool_name, executors).await;
    close_output(&self.pool_name, &output);
    joined.finish()
  }

  /// Self-closing variant that runs in the background. The returned
  /// [`Completion`] resolves once the output has been closed.
  pub fn spawn_and_close<T, U, F, Fut>(
    &self,
    input: QueueConsumer<T>,
    output: QueueProducer<U>,
    transform: F,
  ) -> Completion<PoolReport>
  where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
  {
    let executors = self.spawn_executors(input, Some(output.clone()), transform);
    let pool_name = self.pool_name.clone();
    let supervisor = self.tokio_handle.spawn(
      async move {
        let joined = join_executors(&pool_name, executors).await;
        close_output(&pool_name, &output);
        joined.finish()
      }
      .instrument(info_span!("pool_supervisor", pool_name = %self.pool_name)),
    );
    Completion::new(self.pool_name.clone(), supervisor)
  }

  /// Starts the pool in the background and immediately returns its live output
  /// queue, which is closed once the input is exhausted. Callers must drain it.
  ///
  /// A transform panic under [`FailurePolicy::Propagate`] is logged and the
  /// output still closes; use [`WorkerPool::spawn_and_close`] to observe it.
  pub fn spawn_background<T, U, F, Fut>(&self, input: QueueConsumer<T>, transform: F) -> QueueConsumer<U>
  where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
  {
    let (output, results) = Queue::new(self.config.queue_capacity()).split();
    let _detached = self.spawn_and_close(input, output, transform);
    results
  }

  /// Drain-only pool: every task is handed to `consumer` and nothing is
  /// forwarded. The returned [`Completion`] resolves once the input is closed
  /// and drained and every executor has exited.
  pub fn drain<T, F, Fut>(&self, input: QueueConsumer<T>, consumer: F) -> Completion<PoolReport>
  where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let executors = self.spawn_executors::<T, (), F, Fut>(input, None, consumer);
    let pool_name = self.pool_name.clone();
    let supervisor = self.tokio_handle.spawn(
      async move { join_executors(&pool_name, executors).await.finish() }
        .instrument(info_span!("pool_supervisor", pool_name = %self.pool_name)),
    );
    Completion::new(self.pool_name.clone(), supervisor)
  }

  fn spawn_executors<T, U, F, Fut>(
    &self,
    input: QueueConsumer<T>,
    output: Option<QueueProducer<U>>,
    transform: F,
  ) -> Vec<JoinHandle<ExecutorStats>>
  where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
  {
    info!(pool_name = %self.pool_name, concurrency = self.config.concurrency, "Starting executors.");
    let transform = Arc::new(transform);
    (0..self.config.concurrency)
      .map(|executor_id| {
        self.tokio_handle.spawn(
          run_executor(
            self.pool_name.clone(),
            input.clone(),
            output.clone(),
            transform.clone(),
            self.config.failure_policy,
          )
          .instrument(info_span!("pool_executor", pool_name = %self.pool_name, executor = executor_id)),
        )
      })
      .collect()
  }
}

/// Runs a self-closing pool of `concurrency` executors with default settings.
///
/// # Panics
/// Panics if `concurrency` is zero.
pub async fn worker_pool<T, U, F, Fut>(
  input: QueueConsumer<T>,
  output: QueueProducer<U>,
  transform: F,
  concurrency: usize,
) -> PoolReport
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = U> + Send + 'static,
{
  WorkerPool::new(PoolConfig::new(concurrency))
    .run_and_close(input, output, transform)
    .await
}

async fn run_executor<T, U, F, Fut>(
  pool_name: Arc<str>,
  input: QueueConsumer<T>,
  mut output: Option<QueueProducer<U>>,
  transform: Arc<F>,
  policy: FailurePolicy,
) -> ExecutorStats
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = U> + Send + 'static,
{
  trace!("Executor started.");
  let mut stats = ExecutorStats::default();

  while let Some(task) = input.pop().await {
    let result = match policy {
      FailurePolicy::Propagate => (*transform)(task).await,
      FailurePolicy::Suppress => match AssertUnwindSafe(async { (*transform)(task).await })
        .catch_unwind()
        .await
      {
        Ok(result) => result,
        Err(_panic_payload) => {
          stats.failed += 1;
          error!(pool_name = %pool_name, "Transform panicked; unit discarded, executor continues.");
          continue;
        }
      },
    };
    stats.processed += 1;

    let delivered = match &output {
      Some(sink) => sink.push(result).await,
      None => Ok(()),
    };
    match delivered {
      Ok(()) => trace!("Result handled."),
      Err(PushError::Closed(_)) => {
        error!(pool_name = %pool_name, "Output queue was closed while executors were still delivering.");
        panic!("worker pool `{}`: output queue closed by another party while the pool was delivering", pool_name);
      }
      Err(_disconnected) => {
        warn!(pool_name = %pool_name, "Every output consumer is gone; discarding further results.");
        output = None;
      }
    }
  }

  debug!(processed = stats.processed, failed = stats.failed, "Input closed and drained. Executor exiting.");
  stats
}

async fn join_executors(pool_name: &str, executors: Vec<JoinHandle<ExecutorStats>>) -> JoinedExecutors {
  let mut joined = JoinedExecutors::default();
  for (executor_id, result) in futures::future::join_all(executors).await.into_iter().enumerate() {
    match result {
      Ok(stats) => {
        joined.report.processed += stats.processed;
        joined.report.failed += stats.failed;
      }
      Err(join_error) if join_error.is_panic() => {
        error!(pool_name = %pool_name, executor = executor_id, "Executor panicked; re-raising once the pool has stopped.");
        if joined.panic.is_none() {
          joined.panic = Some(join_error.into_panic());
        }
      }
      Err(join_error) => {
        error!(pool_name = %pool_name, executor = executor_id, "Executor was cancelled: {:?}", join_error);
      }
    }
  }
  info!(
    pool_name = %pool_name,
    processed = joined.report.processed,
    failed = joined.report.failed,
    "All executors stopped."
  );
  joined
}

fn close_output<U: Send + 'static>(pool_name: &str, output: &QueueProducer<U>) {
  if output.close().is_err() {
    error!(pool_name = %pool_name, "Output queue was already closed when the pool finished.");
    panic!("worker pool `{}`: output queue was closed by another party", pool_name);
  }
  debug!(pool_name = %pool_name, "Output queue closed.");
}
