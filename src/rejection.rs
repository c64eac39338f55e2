use crate::error::ExecutorError;
use crate::executor::ReusableExecutor;
use crate::task::{Job, JobInfo};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Callback signature for [`RejectionPolicy::Custom`].
pub type RejectionHandler = dyn Fn(Job, &ReusableExecutor) -> Result<(), ExecutorError> + Send + Sync + 'static;

/// What happens to a job that cannot be queued, because the executor is
/// shutting down or the queue is full.
#[derive(Clone, Default)]
pub enum RejectionPolicy {
  /// Return `ExecutorError::Rejected` to the submitter.
  #[default]
  Abort,
  /// Run the job synchronously on the submitting thread, bypassing the queue.
  CallerRuns,
  /// Drop the job silently. A dropped handle-backed job cancels its handle.
  Discard,
  /// Delegate to a user callback.
  Custom(Arc<RejectionHandler>),
}

impl RejectionPolicy {
  pub fn custom<F>(handler: F) -> Self
  where
    F: Fn(Job, &ReusableExecutor) -> Result<(), ExecutorError> + Send + Sync + 'static,
  {
    RejectionPolicy::Custom(Arc::new(handler))
  }

  /// Discards rejected jobs, recording them in `counter`.
  pub fn counting(counter: Arc<RejectionCounter>) -> Self {
    Self::custom(move |job, _executor| {
      counter.record(job.info());
      Ok(())
    })
  }

  pub(crate) fn reject(&self, job: Job, executor: &ReusableExecutor) -> Result<(), ExecutorError> {
    match self {
      RejectionPolicy::Abort => {
        warn!(executor = %executor.name(), task_id = job.id(), "Task rejected (abort policy).");
        Err(ExecutorError::Rejected {
          task_id: job.id(),
          executor: executor.to_string(),
        })
      }
      RejectionPolicy::CallerRuns => {
        debug!(executor = %executor.name(), task_id = job.id(), "Task rejected; running on the caller thread.");
        job.run();
        Ok(())
      }
      RejectionPolicy::Discard => {
        debug!(executor = %executor.name(), task_id = job.id(), "Task rejected; discarded.");
        Ok(())
      }
      RejectionPolicy::Custom(handler) => handler(job, executor),
    }
  }
}

impl fmt::Debug for RejectionPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RejectionPolicy::Abort => f.write_str("Abort"),
      RejectionPolicy::CallerRuns => f.write_str("CallerRuns"),
      RejectionPolicy::Discard => f.write_str("Discard"),
      RejectionPolicy::Custom(_) => f.write_str("Custom(..)"),
    }
  }
}

/// Tally of rejected jobs, shared with a [`RejectionPolicy::counting`] policy.
#[derive(Debug, Default)]
pub struct RejectionCounter {
  count: AtomicU64,
  last: Mutex<Option<JobInfo>>,
}

impl RejectionCounter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of jobs rejected so far.
  pub fn count(&self) -> u64 {
    self.count.load(AtomicOrdering::SeqCst)
  }

  pub fn last_rejected(&self) -> Option<JobInfo> {
    *self.last.lock()
  }

  fn record(&self, info: JobInfo) {
    *self.last.lock() = Some(info);
    self.count.fetch_add(1, AtomicOrdering::SeqCst);
  }
}
