use std::fmt;
use thiserror::Error;

/// Errors that can occur within the `futures_conveyor` pools and queues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Queue was already closed; a queue may only be closed once")]
  QueueAlreadyClosed,

  #[error("Pool is shutting down or already shut down, cannot accept new tasks")]
  PoolShuttingDown,

  #[error("Submitted task panicked")]
  TaskPanicked,

  #[error("Response slot was dropped before a result was written (executor died)")]
  ResponseDropped,
}

/// Returned by [`QueueProducer::push`](crate::QueueProducer::push) when a value
/// could not be enqueued. The rejected value is handed back to the caller.
#[derive(Error, PartialEq, Eq)]
pub enum PushError<T> {
  #[error("Push on a closed queue")]
  Closed(T),

  #[error("Push on a queue with no remaining consumers")]
  Disconnected(T),

  #[error("Queue is full")]
  Full(T),
}

impl<T> PushError<T> {
  /// Recovers the value that failed to be pushed.
  pub fn into_inner(self) -> T {
    match self {
      PushError::Closed(value) | PushError::Disconnected(value) | PushError::Full(value) => value,
    }
  }
}

impl<T> fmt::Debug for PushError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PushError::Closed(_) => f.write_str("Closed(..)"),
      PushError::Disconnected(_) => f.write_str("Disconnected(..)"),
      PushError::Full(_) => f.write_str("Full(..)"),
    }
  }
}

/// Returned by [`QueueConsumer::try_pop`](crate::QueueConsumer::try_pop).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPopError {
  #[error("Queue is empty")]
  Empty,

  #[error("Queue is closed and drained")]
  Closed,
}
