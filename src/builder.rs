use crate::error::ExecutorError;
use crate::executor::{ExecutorParts, ReusableExecutor};
use crate::queue::{BlockingQueue, TaskQueue};
use crate::rejection::RejectionPolicy;
use crate::task::Job;
use crate::thread_factory::{IndexedThreadFactory, ThreadFactory};
use crate::worker::{ExecutionHooks, NoopHooks};

use std::sync::Arc;

const DEFAULT_NAME: &str = "reusable-executor";

enum QueueConfig {
  Unbounded,
  Bounded(usize),
  Custom(Arc<dyn BlockingQueue<Job>>),
}

/// Builder for configuring and creating a [`ReusableExecutor`].
///
/// Defaults: unbounded queue, threads named `"<name>-<index>"` starting at 1,
/// the `Abort` rejection policy and no hooks.
///
/// ```rust,ignore
/// let executor = ReusableExecutor::builder()
///   .name("ingest")
///   .queue_capacity(64)
///   .rejection_policy(RejectionPolicy::CallerRuns)
///   .build()?;
/// ```
pub struct ExecutorBuilder {
  name: String,
  queue: QueueConfig,
  thread_factory: Option<Arc<dyn ThreadFactory>>,
  thread_name_pattern: Option<String>,
  rejection_policy: RejectionPolicy,
  hooks: Arc<dyn ExecutionHooks>,
}

impl ExecutorBuilder {
  pub fn new() -> Self {
    Self {
      name: DEFAULT_NAME.to_string(),
      queue: QueueConfig::Unbounded,
      thread_factory: None,
      thread_name_pattern: None,
      rejection_policy: RejectionPolicy::default(),
      hooks: Arc::new(NoopHooks),
    }
  }

  /// Name used in logs, in `Display`, and for default thread names.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Bounds the default queue. A full queue rejects instead of blocking.
  pub fn queue_capacity(mut self, capacity: usize) -> Self {
    self.queue = QueueConfig::Bounded(capacity);
    self
  }

  /// Uses a caller-provided queue instead of the default [`TaskQueue`].
  pub fn queue(mut self, queue: impl BlockingQueue<Job> + 'static) -> Self {
    self.queue = QueueConfig::Custom(Arc::new(queue));
    self
  }

  pub fn thread_factory(mut self, factory: impl ThreadFactory + 'static) -> Self {
    self.thread_factory = Some(Arc::new(factory));
    self
  }

  /// Pattern for the default [`IndexedThreadFactory`], e.g. `"io-worker-{}"`.
  /// Ignored when a thread factory is set.
  pub fn thread_name_pattern(mut self, pattern: impl Into<String>) -> Self {
    self.thread_name_pattern = Some(pattern.into());
    self
  }

  pub fn rejection_policy(mut self, policy: RejectionPolicy) -> Self {
    self.rejection_policy = policy;
    self
  }

  pub fn hooks(mut self, hooks: impl ExecutionHooks + 'static) -> Self {
    self.hooks = Arc::new(hooks);
    self
  }

  /// Builds the executor and starts its worker thread.
  ///
  /// # Errors
  /// Returns `ExecutorError::WorkerSpawn` if the worker thread cannot be created.
  pub fn build(self) -> Result<ReusableExecutor, ExecutorError> {
    let queue: Arc<dyn BlockingQueue<Job>> = match self.queue {
      QueueConfig::Unbounded => Arc::new(TaskQueue::unbounded()),
      QueueConfig::Bounded(capacity) => Arc::new(TaskQueue::bounded(capacity)),
      QueueConfig::Custom(queue) => queue,
    };
    let thread_factory: Arc<dyn ThreadFactory> = match self.thread_factory {
      Some(factory) => factory,
      None => {
        let pattern = self.thread_name_pattern.unwrap_or_else(|| format!("{}-{{}}", self.name));
        Arc::new(IndexedThreadFactory::new(pattern, 1))
      }
    };

    ReusableExecutor::start(ExecutorParts {
      name: self.name,
      queue,
      thread_factory,
      rejection_policy: self.rejection_policy,
      hooks: self.hooks,
    })
  }
}

impl Default for ExecutorBuilder {
  fn default() -> Self {
    Self::new()
  }
}
