use crate::config::{FailurePolicy, PoolConfig};
use crate::error::{PoolError, PushError};
use crate::handle::{Completion, Response};
use crate::queue::{Queue, QueueProducer};
use crate::task::Request;
use crate::worker::{PoolReport, WorkerPool};

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

lazy_static::lazy_static! {
  static ref NEXT_REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Defines how the dispatcher should behave upon shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
  /// Every request queued before the shutdown is processed and answered.
  #[default]
  Graceful,
  /// Requests already running finish; requests still queued are answered with
  /// `PoolError::PoolShuttingDown` without running the transform.
  Abort,
}

/// Cloneable submission handle for an [`AsyncPool`], usable from any task.
pub struct Submitter<T, U> {
  pool_name: Arc<str>,
  requests: QueueProducer<Request<T, U>>,
}

impl<T, U> Clone for Submitter<T, U> {
  fn clone(&self) -> Self {
    Self {
      pool_name: self.pool_name.clone(),
      requests: self.requests.clone(),
    }
  }
}

impl<T, U> fmt::Debug for Submitter<T, U> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Submitter")
      .field("pool_name", &self.pool_name)
      .field("closed", &self.requests.is_closed())
      .finish_non_exhaustive()
  }
}

impl<T: Send + 'static, U: Send + 'static> Submitter<T, U> {
  /// Enqueues `value` and returns its private response slot.
  ///
  /// Waits only while the shared request queue is full.
  ///
  /// # Errors
  /// Returns `PoolError::PoolShuttingDown` if the pool has been shut down.
  pub async fn submit(&self, value: T) -> Result<Response<U>, PoolError> {
    let request_id = NEXT_REQUEST_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let (response_tx, response_rx) = oneshot::channel();
    let request = Request {
      request_id,
      value,
      response: response_tx,
    };

    trace!(pool_name = %self.pool_name, %request_id, "Submitting request.");
    match self.requests.push(request).await {
      Ok(()) => Ok(Response {
        request_id,
        receiver: response_rx,
      }),
      Err(PushError::Closed(_)) => {
        warn!(pool_name = %self.pool_name, %request_id, "Submit: Attempted to submit to a pool that is shut down.");
        Err(PoolError::PoolShuttingDown)
      }
      Err(_disconnected) => {
        error!(pool_name = %self.pool_name, %request_id, "Submit: Every executor is gone; request rejected.");
        Err(PoolError::PoolShuttingDown)
      }
    }
  }

  /// Number of requests waiting for an executor.
  pub fn queued_request_count(&self) -> usize {
    self.requests.len()
  }
}

/// A long-lived pool turned into a request/response service.
///
/// Every submission carries its own single-use response slot, so results can be
/// collected from arbitrary call sites in any order. Executors answer requests
/// in the order they dequeue them; there is no ordering between independent
/// requests beyond each response being delivered after its request ran.
pub struct AsyncPool<T, U> {
  pool_name: Arc<str>,
  submitter: Submitter<T, U>,
  abort_token: CancellationToken,
  failed: Arc<AtomicU64>,
  aborted: Arc<AtomicU64>,
  completion: Option<Completion<PoolReport>>,
}

impl<T, U> fmt::Debug for AsyncPool<T, U> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncPool")
      .field("pool_name", &self.pool_name)
      .field("aborted", &self.abort_token.is_cancelled())
      .field("failed", &self.failed.load(AtomicOrdering::Relaxed))
      .field("aborted", &self.aborted.load(AtomicOrdering::Relaxed))
      .field("completion", &self.completion)
      .finish_non_exhaustive()
  }
}

impl<T: Send + 'static, U: Send + 'static> AsyncPool<T, U> {
  /// Starts `config.concurrency()` executors answering requests with
  /// `transform`.
  ///
  /// # Panics
  /// Panics if the configured concurrency is zero, or if called outside a
  /// Tokio runtime.
  pub fn new<F, Fut>(config: PoolConfig, transform: F) -> Self
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = U> + Send + 'static,
  {
    let policy = config.failure_policy();
    // Panics are answered per request below, so the executors themselves run
    // with the propagating policy.
    let pool = WorkerPool::new(config.clone().with_failure_policy(FailurePolicy::Propagate));
    let pool_name: Arc<str> = Arc::from(pool.name());
    let (requests, inbox) = Queue::new(config.queue_capacity()).split();
    let abort_token = CancellationToken::new();
    let failed = Arc::new(AtomicU64::new(0));
    let aborted = Arc::new(AtomicU64::new(0));
    let transform = Arc::new(transform);

    let handler = {
      let pool_name = pool_name.clone();
      let abort_token = abort_token.clone();
      let failed = failed.clone();
      let aborted = aborted.clone();
      move |request: Request<T, U>| {
        answer(
          request,
          transform.clone(),
          policy,
          abort_token.clone(),
          Outcomes {
            failed: failed.clone(),
            aborted: aborted.clone(),
          },
          pool_name.clone(),
        )
      }
    };
    let completion = pool.drain(inbox, handler);
    info!(pool_name = %pool_name, concurrency = config.concurrency(), "Async pool started.");

    Self {
      pool_name: pool_name.clone(),
      submitter: Submitter { pool_name, requests },
      abort_token,
      failed,
      aborted,
      completion: Some(completion),
    }
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  /// Returns a cloneable handle for submitting from other tasks.
  pub fn submitter(&self) -> Submitter<T, U> {
    self.submitter.clone()
  }

  /// See [`Submitter::submit`].
  pub async fn submit(&self, value: T) -> Result<Response<U>, PoolError> {
    self.submitter.submit(value).await
  }

  pub fn queued_request_count(&self) -> usize {
    self.submitter.queued_request_count()
  }

  /// Closes the request queue and waits until every executor has drained it
  /// and exited. Requests answered by an abort are neither processed nor
  /// failed in the returned report. Later submissions through outstanding [`Submitter`]s fail with
  /// `PoolError::PoolShuttingDown`.
  ///
  /// # Panics
  /// Re-raises a transform panic when the pool runs with
  /// [`FailurePolicy::Propagate`].
  pub async fn shutdown(mut self, mode: ShutdownMode) -> Result<PoolReport, PoolError> {
    info!(pool_name = %self.pool_name, "Initiating async pool shutdown (mode: {:?}).", mode);
    if mode == ShutdownMode::Abort {
      self.abort_token.cancel();
    }
    if !self.submitter.requests.is_closed() {
      let _ = self.submitter.requests.close();
    }

    let completion = match self.completion.take() {
      Some(completion) => completion,
      None => return Ok(PoolReport::default()),
    };
    let mut report = completion.wait().await?;
    let aborted = self.aborted.load(AtomicOrdering::Acquire);
    report.failed += self.failed.load(AtomicOrdering::Acquire);
    report.processed = report.processed.saturating_sub(report.failed + aborted);
    info!(
      pool_name = %self.pool_name,
      processed = report.processed,
      failed = report.failed,
      aborted,
      "Async pool shutdown completed."
    );
    Ok(report)
  }
}

impl<T, U> Drop for AsyncPool<T, U> {
  fn drop(&mut self) {
    if self.completion.is_some() && !self.submitter.requests.is_closed() {
      info!(
        pool_name = %self.pool_name,
        "AsyncPool dropped without shutdown. Closing request queue; executors finish queued work in the background."
      );
      let _ = self.submitter.requests.close();
    }
  }
}

/// Builds an [`AsyncPool`] with default settings and returns it together with
/// a submission handle.
///
/// # Panics
/// Panics if `concurrency` is zero.
pub fn make_async_pool<T, U, F, Fut>(transform: F, concurrency: usize) -> (Submitter<T, U>, AsyncPool<T, U>)
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = U> + Send + 'static,
{
  let pool = AsyncPool::new(PoolConfig::new(concurrency).with_name("async_pool"), transform);
  (pool.submitter(), pool)
}

/// Counters for requests the drain pool handled without a transform result.
struct Outcomes {
  failed: Arc<AtomicU64>,
  aborted: Arc<AtomicU64>,
}

async fn answer<T, U, F, Fut>(
  request: Request<T, U>,
  transform: Arc<F>,
  policy: FailurePolicy,
  abort_token: CancellationToken,
  outcomes: Outcomes,
  pool_name: Arc<str>,
) where
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = U> + Send + 'static,
{
  let Request {
    request_id,
    value,
    response,
  } = request;

  if abort_token.is_cancelled() {
    outcomes.aborted.fetch_add(1, AtomicOrdering::AcqRel);
    debug!(pool_name = %pool_name, %request_id, "Pool aborted; answering queued request without running it.");
    let _ = response.send(Err(PoolError::PoolShuttingDown));
    return;
  }

  let outcome = match policy {
    FailurePolicy::Propagate => Ok((*transform)(value).await),
    FailurePolicy::Suppress => AssertUnwindSafe(async { (*transform)(value).await })
      .catch_unwind()
      .await
      .map_err(|_panic_payload| {
        outcomes.failed.fetch_add(1, AtomicOrdering::AcqRel);
        error!(pool_name = %pool_name, %request_id, "Request transform panicked.");
        PoolError::TaskPanicked
      }),
  };

  if response.send(outcome).is_err() {
    trace!(pool_name = %pool_name, %request_id, "Response receiver dropped; result discarded.");
  }
}
