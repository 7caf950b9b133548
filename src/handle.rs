use crate::error::PoolError;

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// The private, single-use response slot returned for every request submitted
/// to an [`AsyncPool`](crate::AsyncPool).
///
/// The pool writes to it at most once. Reading consumes the handle, so a
/// response can never be read twice.
pub struct Response<U> {
  pub(crate) request_id: u64,
  pub(crate) receiver: oneshot::Receiver<Result<U, PoolError>>,
}

impl<U> fmt::Debug for Response<U> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Response")
      .field("request_id", &self.request_id)
      .finish_non_exhaustive()
  }
}

impl<U> Response<U> {
  /// Returns the unique ID of the request this slot answers.
  pub fn id(&self) -> u64 {
    self.request_id
  }

  /// Waits for the pool to answer the request.
  ///
  /// # Errors
  /// Returns `PoolError::TaskPanicked` if the transform panicked and the pool
  /// suppresses failures, `PoolError::PoolShuttingDown` if the request was
  /// still queued when the pool was aborted, and `PoolError::ResponseDropped` if
  /// the executor died before writing a result.
  pub async fn await_result(self) -> Result<U, PoolError> {
    match self.receiver.await {
      Ok(outcome) => outcome,
      Err(_) => {
        warn!(request_id = %self.request_id, "Response slot dropped without a result.");
        Err(PoolError::ResponseDropped)
      }
    }
  }
}

/// Handle to a background activity started by this crate: a self-closing
/// worker pool, a generator, or a counted generator.
///
/// Awaiting [`Completion::wait`] is the "no more results will arrive" signal.
/// A panic that escaped the activity is re-raised in the waiting task.
pub struct Completion<R> {
  name: Arc<str>,
  join: JoinHandle<R>,
}

impl<R> fmt::Debug for Completion<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Completion")
      .field("name", &self.name)
      .field("finished", &self.join.is_finished())
      .finish()
  }
}

impl<R> Completion<R> {
  pub(crate) fn new(name: Arc<str>, join: JoinHandle<R>) -> Self {
    Self { name, join }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Returns `true` once the activity has stopped.
  pub fn is_finished(&self) -> bool {
    self.join.is_finished()
  }

  /// Waits for the activity to stop and returns what it produced.
  ///
  /// # Panics
  /// Resumes the panic of the activity, if it panicked.
  ///
  /// # Errors
  /// Returns `PoolError::PoolShuttingDown` if the runtime cancelled the
  /// activity before it finished.
  pub async fn wait(self) -> Result<R, PoolError> {
    match self.join.await {
      Ok(output) => Ok(output),
      Err(join_error) if join_error.is_panic() => std::panic::resume_unwind(join_error.into_panic()),
      Err(join_error) => {
        error!(name = %self.name, "Background activity was cancelled by the runtime: {:?}", join_error);
        Err(PoolError::PoolShuttingDown)
      }
    }
  }
}
