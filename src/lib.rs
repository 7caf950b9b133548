//! Tokio-based worker pools and pipeline stages connected by bounded queues.
//!
//! The building blocks:
//! - [`Queue`]: a bounded multi-producer, multi-consumer queue with an explicit,
//!   checked close.
//! - [`WorkerPool`]: N executors draining an input queue through a transform
//!   into an output queue, in completion order.
//! - [`parallel_map`] and friends: order-preserving parallel maps on top of a
//!   pool.
//! - [`AsyncPool`]: a long-lived pool answering individual requests through
//!   private response slots.
//! - [`generate`]: a background producer with a cooperative stop.
//! - [`stage`] and [`transform`]: small composable stages and sequence helpers.

mod config;
mod dispatcher;
mod error;
mod generator;
mod handle;
mod parallel;
mod queue;
pub mod stage;
mod task;
pub mod transform;
mod worker;

pub use config::{FailurePolicy, PoolConfig};
pub use dispatcher::{make_async_pool, AsyncPool, ShutdownMode, Submitter};
pub use error::{PoolError, PushError, TryPopError};
pub use generator::{generate, generate_into, generate_n, Generator};
pub use handle::{Completion, Response};
pub use parallel::{
  parallel_map, parallel_map_cloned, parallel_map_map, parallel_map_stream, parallel_map_stream_with_finisher,
  parallel_map_with,
};
pub use queue::{Queue, QueueConsumer, QueueProducer};
pub use task::Indexed;
pub use worker::{worker_pool, PoolReport, WorkerPool};
