//! Sequence helpers used around the pools: skip-aware mapping and retries.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

/// Outcome of one element in [`map_skip`] that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError<E> {
  /// Leave the element out of the output. Not an error.
  Skip,
  /// Stop mapping and report `E`.
  Fail(E),
}

/// Returned by [`map_skip`] when an element failed: the values mapped so far
/// together with the failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("mapping stopped after {} values: {error}", .output.len())]
pub struct PartialMap<U, E> {
  pub output: Vec<U>,
  pub error: E,
}

/// Maps `items` with `f`, leaving out every element for which `f` returns
/// [`MapError::Skip`]. The first [`MapError::Fail`] halts the mapping.
///
/// # Errors
/// Returns a [`PartialMap`] holding the values mapped before the failure.
pub fn map_skip<T, U, E, F, I>(mut f: F, items: I) -> Result<Vec<U>, PartialMap<U, E>>
where
  F: FnMut(T) -> Result<U, MapError<E>>,
  I: IntoIterator<Item = T>,
{
  let mut output = Vec::new();
  for item in items {
    match f(item) {
      Ok(value) => output.push(value),
      Err(MapError::Skip) => {}
      Err(MapError::Fail(error)) => return Err(PartialMap { output, error }),
    }
  }
  Ok(output)
}

/// Calls `f` up to `attempts` times and returns the first success. An
/// `attempts` of zero is treated as one.
///
/// # Errors
/// Returns the error of the last attempt.
pub async fn retry<R, E, F, Fut>(attempts: usize, mut f: F) -> Result<R, E>
where
  E: fmt::Display,
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<R, E>>,
{
  let attempts = attempts.max(1);
  let mut attempt = 1;
  loop {
    match f().await {
      Ok(value) => return Ok(value),
      Err(e) if attempt >= attempts => {
        warn!(attempt, "Giving up: {}", e);
        return Err(e);
      }
      Err(e) => {
        debug!(attempt, attempts, "Attempt failed: {}. Retrying.", e);
        attempt += 1;
      }
    }
  }
}

/// Calls `f` until it succeeds, sleeping between attempts. The pause starts at
/// `min` and grows by half each time up to `max`. Once `total` has elapsed, one
/// last attempt is made at the deadline and its result returned.
///
/// # Errors
/// Returns the error of the final attempt.
pub async fn retry_with_backoff<R, E, F, Fut>(min: Duration, max: Duration, total: Duration, mut f: F) -> Result<R, E>
where
  E: fmt::Display,
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<R, E>>,
{
  let deadline = Instant::now() + total;
  let max = max.max(min);
  let mut pause = min;
  let mut attempt = 1u32;
  loop {
    let e = match f().await {
      Ok(value) => return Ok(value),
      Err(e) => e,
    };
    let now = Instant::now();
    if now >= deadline {
      warn!(attempt, "Retry deadline reached: {}", e);
      return Err(e);
    }
    debug!(attempt, pause_ms = pause.as_millis() as u64, "Attempt failed: {}. Backing off.", e);
    time::sleep_until((now + pause).min(deadline)).await;
    pause = pause.mul_f64(1.5).min(max);
    attempt += 1;
  }
}
