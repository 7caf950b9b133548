/// What a pool does when a transform panics while processing one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
  /// The panic unwinds the executor that hit it. The remaining executors keep
  /// draining the input, and the panic is re-raised to whoever waits on the
  /// pool once every executor has exited.
  #[default]
  Propagate,
  /// The panic is caught and logged; the failed unit is consumed without
  /// forwarding a result and the executor moves on to the next one.
  Suppress,
}

/// Configuration shared by every pool flavour in this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  pub(crate) name: String,
  pub(crate) concurrency: usize,
  pub(crate) queue_capacity: Option<usize>,
  pub(crate) failure_policy: FailurePolicy,
}

impl PoolConfig {
  /// Creates a configuration for `concurrency` executors.
  ///
  /// A concurrency of zero is accepted here but rejected (with a panic) when a
  /// pool is built from this configuration.
  pub fn new(concurrency: usize) -> Self {
    Self {
      name: "pool".to_string(),
      concurrency,
      queue_capacity: None,
      failure_policy: FailurePolicy::default(),
    }
  }

  /// Sets the name used in log records and spans.
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Sets the depth of queues the pool creates for itself (the dispatcher's
  /// shared input, background outputs).
  pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
    self.queue_capacity = Some(capacity);
    self
  }

  pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
    self.failure_policy = policy;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn concurrency(&self) -> usize {
    self.concurrency
  }

  pub fn failure_policy(&self) -> FailurePolicy {
    self.failure_policy
  }

  /// Depth of internally created queues. Defaults to `concurrency / 2 + 1`,
  /// enough to keep a free slot in front of busy executors.
  pub fn queue_capacity(&self) -> usize {
    self
      .queue_capacity
      .unwrap_or(self.concurrency / 2 + 1)
      .max(1)
  }
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self::new(1)
  }
}
