use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error type a fallible task may return.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur within the `reusable_executor` executor.
#[derive(Error, Debug)]
pub enum ExecutorError {
  #[error("No task was given for execution")]
  NullTask,

  #[error("Bulk operation was given an empty task set")]
  EmptyTaskSet,

  #[error("Task {task_id} rejected from {executor}")]
  Rejected { task_id: u64, executor: String },

  #[error("Task failed: {0}")]
  TaskFailed(TaskFailure),

  #[error("Task was cancelled")]
  TaskCancelled,

  #[error("Every task in invoke_any failed; last failure: {last}")]
  AllTasksFailed { last: TaskFailure },

  #[error("Bulk operation deadline elapsed before completion")]
  Timeout,

  #[error("Waiting thread was interrupted")]
  Interrupted,

  #[error("Task result already taken or not available")]
  ResultUnavailable,

  #[error("Failed to spawn the worker thread: {0}")]
  WorkerSpawn(#[from] std::io::Error),
}

impl ExecutorError {
  /// Returns `true` for `Rejected`.
  pub fn is_rejected(&self) -> bool {
    matches!(self, ExecutorError::Rejected { .. })
  }
}

/// A task's own failure. Always surfaced through the task's handle (or handed
/// to the post-execution hook for fire-and-forget jobs).
#[derive(Clone)]
pub enum TaskFailure {
  /// The task body panicked; carries the panic message when it was a string.
  Panicked(String),
  /// The task returned an error value.
  Errored(Arc<dyn StdError + Send + Sync + 'static>),
}

impl TaskFailure {
  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "<non-string panic payload>".to_string()
    };
    TaskFailure::Panicked(message)
  }

  pub(crate) fn from_error(err: BoxError) -> Self {
    TaskFailure::Errored(Arc::from(err))
  }

  pub fn is_panic(&self) -> bool {
    matches!(self, TaskFailure::Panicked(_))
  }
}

impl fmt::Display for TaskFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskFailure::Panicked(message) => write!(f, "task panicked: {}", message),
      TaskFailure::Errored(err) => write!(f, "task returned an error: {}", err),
    }
  }
}

impl fmt::Debug for TaskFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskFailure::Panicked(message) => f.debug_tuple("Panicked").field(message).finish(),
      TaskFailure::Errored(err) => f.debug_tuple("Errored").field(&err.to_string()).finish(),
    }
  }
}

impl StdError for TaskFailure {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    match self {
      TaskFailure::Panicked(_) => None,
      TaskFailure::Errored(err) => Some(err.as_ref()),
    }
  }
}
