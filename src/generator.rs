//! Background producers feeding a queue.
//!
//! A generator runs one producer task that keeps calling a function and pushing
//! its results. Stopping is cooperative: [`Generator::stop`] only raises a flag
//! the producer checks between values. Because the output queue buffers values,
//! consumers may still observe up to [`Generator::in_flight_bound`] values after
//! the stop was requested; this is expected, not a bug.

use crate::error::PoolError;
use crate::handle::Completion;
use crate::queue::{Queue, QueueConsumer, QueueProducer};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Close decision shared by the handle and the producer task. Whichever side
/// sees both `close_on_stop` and `exited` closes the output.
#[derive(Debug, Default)]
struct StopGate {
  close_on_stop: bool,
  exited: bool,
}

/// Stop control for a running background producer.
///
/// Dropping the handle does not stop the producer; it keeps running until its
/// output queue is closed or loses every consumer.
pub struct Generator {
  stop_token: CancellationToken,
  gate: Arc<Mutex<StopGate>>,
  close_output: Box<dyn Fn() + Send + Sync>,
  in_flight_bound: usize,
  completion: Completion<u64>,
}

impl fmt::Debug for Generator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Generator")
      .field("stop_requested", &self.stop_token.is_cancelled())
      .field("gate", &*self.gate.lock())
      .field("in_flight_bound", &self.in_flight_bound)
      .field("completion", &self.completion)
      .finish_non_exhaustive()
  }
}

impl Generator {
  /// Asks the producer to stop before its next delivery. Returns immediately.
  /// The output queue is left open unless the producer owned the only handle
  /// to it.
  pub fn stop(&self) {
    debug!(generator = %self.completion.name(), "Stop requested.");
    self.stop_token.cancel();
  }

  /// Like [`Generator::stop`], and the producer closes the output queue once it
  /// observes the stop. If the producer has already exited, the output is
  /// closed here. Readers then get end-of-stream instead of blocking.
  pub fn stop_and_close(&self) {
    {
      let mut gate = self.gate.lock();
      let already_requested = gate.close_on_stop;
      gate.close_on_stop = true;
      if gate.exited && !already_requested {
        debug!(generator = %self.completion.name(), "Producer already exited; closing its output.");
        (self.close_output)();
      }
    }
    debug!(generator = %self.completion.name(), "Stop and close requested.");
    self.stop_token.cancel();
  }

  pub fn is_stop_requested(&self) -> bool {
    self.stop_token.is_cancelled()
  }

  /// Upper bound on values consumers may still read after a stop request:
  /// the output queue's depth plus the value being produced.
  pub fn in_flight_bound(&self) -> usize {
    self.in_flight_bound
  }

  /// Waits for the producer to exit and returns how many values it delivered.
  ///
  /// Only resolves after a stop request, or once the output queue stops
  /// accepting values.
  pub async fn join(self) -> Result<u64, PoolError> {
    self.completion.wait().await
  }
}

/// Starts a producer feeding a fresh single-slot queue with the results of
/// `produce`. The queue ends once the producer exits.
pub fn generate<T, F, Fut>(produce: F) -> (QueueConsumer<T>, Generator)
where
  T: Send + 'static,
  F: FnMut() -> Fut + Send + 'static,
  Fut: Future<Output = T> + Send + 'static,
{
  let (producer, consumer) = Queue::new(1).split();
  let generator = generate_into(produce, producer);
  (consumer, generator)
}

/// Starts a producer pushing the results of `produce` into `output`.
pub fn generate_into<T, F, Fut>(produce: F, output: QueueProducer<T>) -> Generator
where
  T: Send + 'static,
  F: FnMut() -> Fut + Send + 'static,
  Fut: Future<Output = T> + Send + 'static,
{
  let stop_token = CancellationToken::new();
  let gate = Arc::new(Mutex::new(StopGate::default()));
  let in_flight_bound = output.capacity() + 1;
  let weak_output = output.downgrade();
  let close_output = Box::new(move || {
    if let Some(output) = weak_output.upgrade() {
      let _ = output.close();
    }
  });

  let join = tokio::spawn(
    run_generator(produce, output, stop_token.clone(), gate.clone()).instrument(info_span!("generator")),
  );

  Generator {
    stop_token,
    gate,
    close_output,
    in_flight_bound,
    completion: Completion::new(Arc::from("generator"), join),
  }
}

/// Runs `produce` exactly `count` times with indexes `0..count`, pushing each
/// result into `output`, and optionally closes `output` afterwards.
///
/// The returned [`Completion`] resolves with the number of delivered values
/// once the last one has been pushed.
pub fn generate_n<T, F, Fut>(count: usize, mut produce: F, output: QueueProducer<T>, close_output: bool) -> Completion<usize>
where
  T: Send + 'static,
  F: FnMut(usize) -> Fut + Send + 'static,
  Fut: Future<Output = T> + Send + 'static,
{
  let join = tokio::spawn(
    async move {
      let mut delivered = 0;
      for index in 0..count {
        let value = produce(index).await;
        if let Err(e) = output.push(value).await {
          warn!(index, "Output queue rejected value: {}. Stopping early.", e);
          break;
        }
        delivered += 1;
      }
      if close_output && output.close().is_err() {
        warn!("Output queue was already closed by another party.");
      }
      debug!(delivered, count, "Counted generator finished.");
      delivered
    }
    .instrument(info_span!("counted_generator", count)),
  );
  Completion::new(Arc::from("counted_generator"), join)
}

async fn run_generator<T, F, Fut>(
  mut produce: F,
  output: QueueProducer<T>,
  stop_token: CancellationToken,
  gate: Arc<Mutex<StopGate>>,
) -> u64
where
  T: Send + 'static,
  F: FnMut() -> Fut + Send + 'static,
  Fut: Future<Output = T> + Send + 'static,
{
  trace!("Generator started.");
  let mut delivered = 0u64;

  while !stop_token.is_cancelled() {
    let value = produce().await;
    tokio::select! {
      biased;

      _ = stop_token.cancelled() => {
        trace!("Stop observed while delivering; value dropped.");
        break;
      }

      pushed = output.push(value) => match pushed {
        Ok(()) => delivered += 1,
        Err(e) => {
          debug!("Output queue rejected value: {}. Generator exiting.", e);
          break;
        }
      },
    }
  }

  {
    let mut gate = gate.lock();
    gate.exited = true;
    if gate.close_on_stop && output.close().is_err() {
      warn!("Output queue was already closed by another party.");
    }
  }
  info!(delivered, "Generator stopped.");
  delivered
}
