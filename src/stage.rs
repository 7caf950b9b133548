//! Small single-purpose stages that compose with queues.
//!
//! Every stage runs as one background task and communicates only through the
//! queues it returns or is given. A stage that owns its output closes it when it
//! is done, so downstream readers always reach end-of-stream.

use crate::config::FailurePolicy;
use crate::handle::Completion;
use crate::queue::{Queue, QueueConsumer, QueueProducer};

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info_span, trace, warn, Instrument};

fn close_owned<T>(stage: &str, output: &QueueProducer<T>) {
  if output.close().is_err() {
    warn!(stage, "Stage output was already closed by another party.");
  }
}

/// Runs `future` in the background and delivers its result through a
/// single-slot queue, which is closed right after.
pub fn run_async<T, Fut>(future: Fut) -> QueueConsumer<T>
where
  T: Send + 'static,
  Fut: Future<Output = T> + Send + 'static,
{
  let (output, result) = Queue::new(1).split();
  tokio::spawn(
    async move {
      let value = future.await;
      if let Err(e) = output.push(value).await {
        trace!("Result discarded: {}", e);
      }
      close_owned("run_async", &output);
    }
    .instrument(info_span!("run_async")),
  );
  result
}

/// Returns a closed single-slot queue that already holds `value`.
pub fn ready<T>(value: T) -> QueueConsumer<T> {
  let (output, result) = Queue::new(1).split();
  // A fresh queue with one free slot and a live consumer accepts the value.
  let _ = output.try_push(value);
  let _ = output.close();
  result
}

/// Reads one value from `input`, applies `f` and delivers the result through a
/// fresh single-slot queue. If `input` ends without a value, the returned queue
/// is closed empty.
pub fn pipe<T, U, F, Fut>(input: QueueConsumer<T>, f: F) -> QueueConsumer<U>
where
  T: Send + 'static,
  U: Send + 'static,
  F: FnOnce(T) -> Fut + Send + 'static,
  Fut: Future<Output = U> + Send + 'static,
{
  let (output, result) = Queue::new(1).split();
  let delivery = pipe_into(input, f, output.clone());
  tokio::spawn(async move {
    if let Err(e) = delivery.wait().await {
      debug!("Pipe stage did not finish: {}", e);
    }
    close_owned("pipe", &output);
  });
  result
}

/// Reads one value from `input`, applies `f` and pushes the result into
/// `output`. The output is left open. The [`Completion`] resolves to `true`
/// once a result was delivered, or `false` if there was nothing to deliver.
pub fn pipe_into<T, U, F, Fut>(input: QueueConsumer<T>, f: F, output: QueueProducer<U>) -> Completion<bool>
where
  T: Send + 'static,
  U: Send + 'static,
  F: FnOnce(T) -> Fut + Send + 'static,
  Fut: Future<Output = U> + Send + 'static,
{
  let join = tokio::spawn(
    async move {
      let Some(value) = input.pop().await else {
        trace!("Input ended before a value arrived.");
        return false;
      };
      match output.push(f(value).await).await {
        Ok(()) => true,
        Err(e) => {
          debug!("Output rejected piped value: {}", e);
          false
        }
      }
    }
    .instrument(info_span!("pipe")),
  );
  Completion::new(Arc::from("pipe"), join)
}

/// Runs every future concurrently and delivers the results in completion
/// order. The returned queue is closed once all of them have finished.
///
/// A panicking future is re-raised in the background after the queue has been
/// closed; use [`run_all_with`] to observe it.
pub fn run_all<T, Fut, I>(futures: I) -> QueueConsumer<T>
where
  T: Send + 'static,
  Fut: Future<Output = T> + Send + 'static,
  I: IntoIterator<Item = Fut>,
{
  run_all_with(futures, FailurePolicy::Propagate).0
}

/// As [`run_all`], but a panicking future is logged and its result omitted.
pub fn run_all_suppressing<T, Fut, I>(futures: I) -> QueueConsumer<T>
where
  T: Send + 'static,
  Fut: Future<Output = T> + Send + 'static,
  I: IntoIterator<Item = Fut>,
{
  run_all_with(futures, FailurePolicy::Suppress).0
}

/// Runs every future concurrently under `policy` and returns the result queue
/// together with a [`Completion`] reporting how many results were delivered.
///
/// Under [`FailurePolicy::Propagate`] the first panic is re-raised by
/// [`Completion::wait`] after the queue has been closed.
pub fn run_all_with<T, Fut, I>(futures: I, policy: FailurePolicy) -> (QueueConsumer<T>, Completion<usize>)
where
  T: Send + 'static,
  Fut: Future<Output = T> + Send + 'static,
  I: IntoIterator<Item = Fut>,
{
  let mut set = JoinSet::new();
  for future in futures {
    set.spawn(future);
  }
  let total = set.len();
  let (output, results) = Queue::new(total).split();

  let join = tokio::spawn(
    async move {
      let mut delivered = 0usize;
      let mut panic: Option<Box<dyn Any + Send + 'static>> = None;

      while let Some(joined) = set.join_next().await {
        match joined {
          Ok(value) => match output.push(value).await {
            Ok(()) => delivered += 1,
            Err(e) => trace!("Result discarded: {}", e),
          },
          Err(join_error) if join_error.is_panic() => match policy {
            FailurePolicy::Suppress => error!("Future panicked; result omitted."),
            FailurePolicy::Propagate => {
              error!("Future panicked; re-raising once every future has finished.");
              if panic.is_none() {
                panic = Some(join_error.into_panic());
              }
            }
          },
          Err(join_error) => warn!("Future was cancelled: {}", join_error),
        }
      }

      close_owned("run_all", &output);
      debug!(delivered, total, "Every future finished.");
      if let Some(payload) = panic {
        std::panic::resume_unwind(payload);
      }
      delivered
    }
    .instrument(info_span!("run_all", total)),
  );
  (results, Completion::new(Arc::from("run_all"), join))
}

/// Forwards the values of `input` accepted by `predicate`. The output is
/// closed once `input` ends.
pub fn filter<T, P>(input: QueueConsumer<T>, predicate: P) -> QueueConsumer<T>
where
  T: Send + 'static,
  P: Fn(&T) -> bool + Send + 'static,
{
  let (output, accepted) = Queue::new(input.capacity()).split();
  tokio::spawn(
    async move {
      while let Some(value) = input.pop().await {
        if !predicate(&value) {
          continue;
        }
        if let Err(e) = output.push(value).await {
          debug!("Filter output rejected value: {}. Stopping.", e);
          break;
        }
      }
      close_owned("filter", &output);
    }
    .instrument(info_span!("filter")),
  );
  accepted
}

/// Like [`filter`], but a predicate error diverts the value's error to a second
/// queue. Both queues are closed once `input` ends.
///
/// The stage waits on whichever output is full, so callers must drain both.
pub fn try_filter<T, E, P>(input: QueueConsumer<T>, predicate: P) -> (QueueConsumer<T>, QueueConsumer<E>)
where
  T: Send + 'static,
  E: Send + 'static,
  P: Fn(&T) -> Result<bool, E> + Send + 'static,
{
  let (output, accepted) = Queue::new(input.capacity()).split();
  let (errors, rejected) = Queue::new(input.capacity()).split();
  tokio::spawn(
    async move {
      while let Some(value) = input.pop().await {
        let delivered = match predicate(&value) {
          Ok(true) => output.push(value).await.map_err(|e| e.to_string()),
          Ok(false) => Ok(()),
          Err(e) => errors.push(e).await.map_err(|e| e.to_string()),
        };
        if let Err(reason) = delivered {
          debug!("Filter output rejected value: {}. Stopping.", reason);
          break;
        }
      }
      close_owned("try_filter", &output);
      close_owned("try_filter", &errors);
    }
    .instrument(info_span!("try_filter")),
  );
  (accepted, rejected)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn test_ready_holds_one_value_then_ends() {
    let queue = ready(7);
    assert_eq!(queue.pop().await, Some(7));
    assert_eq!(queue.pop().await, None);
  }

  #[tokio::test]
  async fn test_run_async_delivers_result() {
    let queue = run_async(async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      "done"
    });
    assert_eq!(queue.collect_all().await, vec!["done"]);
  }

  #[tokio::test]
  async fn test_pipe_on_empty_input_closes_output() {
    let (producer, consumer) = Queue::<i32>::new(1).split();
    producer.close().unwrap();
    let piped = pipe(consumer, |v| async move { v * 2 });
    assert_eq!(piped.pop().await, None);
  }
}
