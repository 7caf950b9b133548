use crate::error::PoolError;

use tokio::sync::oneshot;

/// A value tagged with its position in the submission sequence.
///
/// Order-preserving operations carry the index through the pool untouched and
/// use it to put results back where their inputs came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Indexed<T> {
  pub index: usize,
  pub value: T,
}

impl<T> Indexed<T> {
  pub fn new(index: usize, value: T) -> Self {
    Self { index, value }
  }

  /// Replaces the value while keeping the index.
  pub fn with_value<U>(self, value: U) -> Indexed<U> {
    Indexed {
      index: self.index,
      value,
    }
  }
}

/// Internal representation of a request sent to an async dispatcher.
pub(crate) struct Request<T, U> {
  pub(crate) request_id: u64,
  pub(crate) value: T,
  pub(crate) response: oneshot::Sender<Result<U, PoolError>>,
}
