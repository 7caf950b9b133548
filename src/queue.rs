use crate::error::{PoolError, PushError, TryPopError};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{self, Instant};
use tracing::{trace, warn};

/// State shared by both halves of a queue.
#[derive(Debug)]
struct QueueState {
  closed: AtomicBool,
  capacity: usize,
}

/// Owner of the long-lived sender. The sender is only ever cloned for the
/// duration of a single push, so taking it out of the `Option` (or dropping the
/// last producer) is what ends the stream for consumers.
struct ProducerInner<T> {
  tx: Mutex<Option<mpsc::Sender<T>>>,
  state: Arc<QueueState>,
}

impl<T> Drop for ProducerInner<T> {
  fn drop(&mut self) {
    self.state.closed.store(true, Ordering::Release);
  }
}

/// A bounded, multi-producer, multi-consumer queue.
///
/// Built on a `tokio::sync::mpsc` channel whose receiver is shared behind a
/// FIFO async mutex, so concurrent consumers are served round-robin. Closing is
/// explicit and checked: the first [`QueueProducer::close`] succeeds, every later
/// one reports [`PoolError::QueueAlreadyClosed`]. Values buffered before the close
/// remain readable; once they are drained, [`QueueConsumer::pop`] returns `None`.
#[derive(Debug)]
pub struct Queue<T> {
  producer: QueueProducer<T>,
  consumer: QueueConsumer<T>,
}

impl<T> Queue<T> {
  /// Creates a new queue holding at most `capacity` values. A capacity of zero
  /// is treated as one.
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let state = Arc::new(QueueState {
      closed: AtomicBool::new(false),
      capacity,
    });
    Self {
      producer: QueueProducer {
        inner: Arc::new(ProducerInner {
          tx: Mutex::new(Some(tx)),
          state: state.clone(),
        }),
      },
      consumer: QueueConsumer {
        rx: Arc::new(AsyncMutex::new(rx)),
        state,
      },
    }
  }

  /// Splits the queue into its producer and consumer halves.
  pub fn split(self) -> (QueueProducer<T>, QueueConsumer<T>) {
    (self.producer, self.consumer)
  }
}

impl<T: Send + 'static> Queue<T> {
  /// Returns a single-slot queue fed in the background from `items`.
  /// The queue is closed once every item has been pushed.
  pub fn feed_from<I>(items: I) -> QueueConsumer<T>
  where
    I: IntoIterator<Item = T>,
  {
    let items: Vec<T> = items.into_iter().collect();
    let (producer, consumer) = Queue::new(1).split();
    tokio::spawn(async move {
      if let Err(e) = producer.feed(items).await {
        trace!("Background feeder stopped early: {}", e);
      }
      let _ = producer.close();
    });
    consumer
  }
}

/// The producer half of a [`Queue`]. Cheap to clone; every clone pushes into
/// the same queue.
pub struct QueueProducer<T> {
  inner: Arc<ProducerInner<T>>,
}

impl<T> Clone for QueueProducer<T> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<T> fmt::Debug for QueueProducer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueProducer")
      .field("len", &self.len())
      .field("capacity", &self.inner.state.capacity)
      .field("closed", &self.is_closed())
      .finish_non_exhaustive()
  }
}

impl<T> QueueProducer<T> {
  fn sender(&self) -> Option<mpsc::Sender<T>> {
    self.inner.tx.lock().clone()
  }

  /// A handle that can reach the queue without keeping it open.
  pub(crate) fn downgrade(&self) -> WeakProducer<T> {
    WeakProducer {
      inner: Arc::downgrade(&self.inner),
    }
  }

  /// Pushes a value, waiting while the queue is full.
  ///
  /// # Errors
  /// Returns `PushError::Closed` if the queue has been closed, or
  /// `PushError::Disconnected` if every consumer has been dropped.
  pub async fn push(&self, value: T) -> Result<(), PushError<T>> {
    let tx = match self.sender() {
      Some(tx) => tx,
      None => return Err(PushError::Closed(value)),
    };
    tx.send(value)
      .await
      .map_err(|mpsc::error::SendError(value)| PushError::Disconnected(value))
  }

  /// Pushes a value only if a slot is free right now.
  ///
  /// # Errors
  /// Returns `PushError::Full` when no slot is free, otherwise the same errors
  /// as [`QueueProducer::push`].
  pub fn try_push(&self, value: T) -> Result<(), PushError<T>> {
    let tx = match self.sender() {
      Some(tx) => tx,
      None => return Err(PushError::Closed(value)),
    };
    tx.try_send(value).map_err(|e| match e {
      mpsc::error::TrySendError::Full(value) => PushError::Full(value),
      mpsc::error::TrySendError::Closed(value) => PushError::Disconnected(value),
    })
  }

  /// Pushes every item in order, stopping at the first rejected value.
  /// Returns how many items were pushed.
  pub async fn feed<I>(&self, items: I) -> Result<usize, PushError<T>>
  where
    I: IntoIterator<Item = T>,
  {
    let mut pushed = 0;
    for item in items {
      self.push(item).await?;
      pushed += 1;
    }
    Ok(pushed)
  }

  /// Closes the queue. Only the first call succeeds.
  ///
  /// # Errors
  /// Returns `PoolError::QueueAlreadyClosed` if the queue was closed before.
  pub fn close(&self) -> Result<(), PoolError> {
    if self
      .inner
      .state
      .closed
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      warn!("Attempted to close a queue that is already closed.");
      return Err(PoolError::QueueAlreadyClosed);
    }
    self.inner.tx.lock().take();
    Ok(())
  }

  /// Returns `true` once the queue has been closed.
  pub fn is_closed(&self) -> bool {
    self.inner.state.closed.load(Ordering::Acquire)
  }

  /// Returns the number of buffered values. Reports zero after close.
  pub fn len(&self) -> usize {
    self
      .inner
      .tx
      .lock()
      .as_ref()
      .map_or(0, |tx| tx.max_capacity() - tx.capacity())
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The maximum number of values the queue buffers.
  pub fn capacity(&self) -> usize {
    self.inner.state.capacity
  }
}

/// Non-owning producer reference. Once every [`QueueProducer`] is gone the
/// queue has already ended and `upgrade` returns `None`.
pub(crate) struct WeakProducer<T> {
  inner: Weak<ProducerInner<T>>,
}

impl<T> WeakProducer<T> {
  pub(crate) fn upgrade(&self) -> Option<QueueProducer<T>> {
    self.inner.upgrade().map(|inner| QueueProducer { inner })
  }
}

/// The consumer half of a [`Queue`]. Clones share one receiver and take turns
/// in FIFO order.
pub struct QueueConsumer<T> {
  rx: Arc<AsyncMutex<mpsc::Receiver<T>>>,
  state: Arc<QueueState>,
}

impl<T> Clone for QueueConsumer<T> {
  fn clone(&self) -> Self {
    Self {
      rx: self.rx.clone(),
      state: self.state.clone(),
    }
  }
}

impl<T> fmt::Debug for QueueConsumer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueConsumer")
      .field("capacity", &self.state.capacity)
      .field("closed", &self.is_closed())
      .finish_non_exhaustive()
  }
}

impl<T> QueueConsumer<T> {
  /// Receives the next value, waiting while the queue is empty and open.
  /// Returns `None` once the queue is closed and drained.
  pub async fn pop(&self) -> Option<T> {
    let mut rx = self.rx.lock().await;
    rx.recv().await
  }

  /// Non-blocking probe. Reports `Empty` when another consumer currently holds
  /// the receiver.
  pub fn try_pop(&self) -> Result<T, TryPopError> {
    let mut rx = self.rx.try_lock().map_err(|_| TryPopError::Empty)?;
    rx.try_recv().map_err(|e| match e {
      TryRecvError::Empty => TryPopError::Empty,
      TryRecvError::Disconnected => TryPopError::Closed,
    })
  }

  /// Drains the queue until it is closed.
  pub async fn collect_all(&self) -> Vec<T> {
    let mut out = Vec::new();
    while let Some(value) = self.pop().await {
      out.push(value);
    }
    out
  }

  /// Reads up to `n` values, returning early if the queue closes first.
  pub async fn take(&self, n: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
      match self.pop().await {
        Some(value) => out.push(value),
        None => break,
      }
    }
    out
  }

  /// Reads up to `n` values or until `timeout` elapses, whichever comes first.
  ///
  /// This is a best-effort bounded read: the result may hold fewer than `n`
  /// values (possibly none) and that is not an error. Values not yet read when
  /// the deadline passes stay in the queue.
  pub async fn take_timeout(&self, n: usize, timeout: Duration) -> Vec<T> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
      match time::timeout_at(deadline, self.pop()).await {
        Ok(Some(value)) => out.push(value),
        Ok(None) => break,
        Err(_elapsed) => {
          trace!(collected = out.len(), wanted = n, "Bounded drain deadline reached.");
          break;
        }
      }
    }
    out
  }

  /// Returns `true` once the queue has been closed. Buffered values may still
  /// be readable.
  pub fn is_closed(&self) -> bool {
    self.state.closed.load(Ordering::Acquire)
  }

  pub fn capacity(&self) -> usize {
    self.state.capacity
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  #[tokio::test]
  async fn test_queue_push_pop() {
    let (producer, consumer) = Queue::<String>::new(5).split();

    assert!(producer.is_empty());
    producer.push("one".to_string()).await.unwrap();
    assert_eq!(producer.len(), 1);

    assert_eq!(consumer.pop().await.as_deref(), Some("one"));
    assert!(producer.is_empty());
  }

  #[tokio::test]
  async fn test_queue_capacity_blocks_push() {
    let (producer, consumer) = Queue::<u64>::new(1).split();

    producer.push(1).await.unwrap();

    let push_future = producer.push(2);
    tokio::pin!(push_future);

    tokio::select! {
        _ = &mut push_future => {
            panic!("Push should have blocked because the queue is full.");
        },
        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
    }

    assert_eq!(consumer.pop().await, Some(1));

    tokio::time::timeout(Duration::from_millis(50), push_future)
      .await
      .expect("Push did not complete after queue was drained.")
      .unwrap();
    assert_eq!(consumer.pop().await, Some(2));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_queue_concurrent_producers_and_consumers() {
    let (producer, consumer) = Queue::<u64>::new(4).split();
    let num_items: u64 = 40;
    let received_count = Arc::new(AtomicUsize::new(0));

    let mut producers = Vec::new();
    for i in 0..num_items {
      let p = producer.clone();
      producers.push(tokio::spawn(async move {
        p.push(i).await.unwrap();
      }));
    }

    let mut consumers = Vec::new();
    for _ in 0..3 {
      let c = consumer.clone();
      let received_count = received_count.clone();
      consumers.push(tokio::spawn(async move {
        while c.pop().await.is_some() {
          received_count.fetch_add(1, Ordering::SeqCst);
        }
      }));
    }

    for handle in producers {
      handle.await.unwrap();
    }
    producer.close().unwrap();
    for handle in consumers {
      handle.await.unwrap();
    }

    assert_eq!(received_count.load(Ordering::SeqCst), num_items as usize);
  }

  #[tokio::test]
  async fn test_close_keeps_buffered_values_then_ends_stream() {
    let (producer, consumer) = Queue::<u64>::new(2).split();

    producer.push(1).await.unwrap();
    producer.push(2).await.unwrap();
    producer.close().unwrap();

    assert!(consumer.is_closed());
    assert_eq!(consumer.pop().await, Some(1));
    assert_eq!(consumer.pop().await, Some(2));
    assert_eq!(consumer.pop().await, None);
    assert_eq!(consumer.pop().await, None);
  }

  #[tokio::test]
  async fn test_double_close_is_reported() {
    let (producer, _consumer) = Queue::<u64>::new(1).split();
    let second_handle = producer.clone();

    assert_eq!(producer.close(), Ok(()));
    assert_eq!(second_handle.close(), Err(PoolError::QueueAlreadyClosed));
  }

  #[tokio::test]
  async fn test_push_after_close_returns_value() {
    let (producer, _consumer) = Queue::<String>::new(1).split();
    producer.close().unwrap();

    let err = producer.push("late".to_string()).await.unwrap_err();
    assert!(matches!(err, PushError::Closed(_)));
    assert_eq!(err.into_inner(), "late");
  }

  #[tokio::test]
  async fn test_try_push_reports_full() {
    let (producer, consumer) = Queue::<u64>::new(1).split();
    producer.try_push(1).unwrap();
    assert!(matches!(producer.try_push(2), Err(PushError::Full(2))));
    assert_eq!(consumer.pop().await, Some(1));
  }

  #[tokio::test]
  async fn test_push_without_consumers_is_disconnected() {
    let (producer, consumer) = Queue::<u64>::new(1).split();
    drop(consumer);

    let err = producer.push(7).await.unwrap_err();
    assert!(matches!(err, PushError::Disconnected(7)));
  }

  #[tokio::test]
  async fn test_dropping_all_producers_ends_stream() {
    let (producer, consumer) = Queue::<u64>::new(2).split();
    producer.push(9).await.unwrap();
    drop(producer);

    assert_eq!(consumer.pop().await, Some(9));
    assert_eq!(consumer.pop().await, None);
    assert!(consumer.is_closed());
  }

  #[tokio::test]
  async fn test_try_pop_reports_empty_value_and_closed() {
    let (producer, consumer) = Queue::<u64>::new(1).split();

    assert_eq!(consumer.try_pop(), Err(TryPopError::Empty));
    producer.push(3).await.unwrap();
    assert_eq!(consumer.try_pop(), Ok(3));
    producer.close().unwrap();
    assert_eq!(consumer.try_pop(), Err(TryPopError::Closed));
  }

  #[tokio::test]
  async fn test_take_stops_at_n_or_close() {
    let consumer = Queue::feed_from(vec![1, 2, 3, 4]);
    assert_eq!(consumer.take(2).await, vec![1, 2]);
    assert_eq!(consumer.take(5).await, vec![3, 4]);
    assert!(consumer.take(1).await.is_empty());
  }

  #[tokio::test]
  async fn test_take_timeout_returns_partial_batch() {
    let (producer, consumer) = Queue::<u64>::new(4).split();
    producer.push(1).await.unwrap();
    producer.push(2).await.unwrap();

    let batch = consumer.take_timeout(5, Duration::from_millis(30)).await;
    assert_eq!(batch, vec![1, 2]);

    let empty = consumer.take_timeout(5, Duration::from_millis(10)).await;
    assert!(empty.is_empty());
  }

  #[tokio::test]
  async fn test_feed_from_closes_after_last_item() {
    let consumer = Queue::feed_from(0..5u64);
    assert_eq!(consumer.collect_all().await, vec![0, 1, 2, 3, 4]);
  }

  #[test]
  fn test_zero_capacity_is_clamped() {
    let (producer, consumer) = Queue::<u8>::new(0).split();
    assert_eq!(producer.capacity(), 1);
    assert_eq!(consumer.capacity(), 1);
  }
}
