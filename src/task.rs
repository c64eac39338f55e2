use crate::error::BoxError;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio_util::sync::CancellationToken;

lazy_static::lazy_static! {
  static ref NEXT_JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
}

pub(crate) fn next_job_id() -> u64 {
  NEXT_JOB_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

/// A computation producing a typed result or a failure.
/// It must be `Send` and `'static`.
pub type Callable<R> = Box<dyn FnOnce() -> Result<R, BoxError> + Send + 'static>;

/// Boxes an infallible closure as a [`Callable`].
pub fn callable<R, F>(f: F) -> Callable<R>
where
  F: FnOnce() -> R + Send + 'static,
{
  Box::new(move || Ok(f()))
}

/// Boxes a fallible closure as a [`Callable`].
pub fn fallible<R, E, F>(f: F) -> Callable<R>
where
  F: FnOnce() -> Result<R, E> + Send + 'static,
  E: Into<BoxError>,
{
  Box::new(move || f().map_err(Into::into))
}

/// Adapts a no-result action into a [`Callable`] that returns `result` once the
/// action has run.
pub fn with_result<R, F>(action: F, result: R) -> Callable<R>
where
  F: FnOnce() + Send + 'static,
  R: Send + 'static,
{
  Box::new(move || {
    action();
    Ok(result)
  })
}

/// Identifying details of a job, handed to execution hooks and rejection errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobInfo {
  pub id: u64,
  /// Whether the job completes a [`TaskHandle`](crate::TaskHandle).
  pub has_handle: bool,
}

/// The unit that travels through the queue: a no-result action.
///
/// Jobs created by `submit*` complete a handle when run; dropping such a job
/// without running it cancels the handle.
pub struct Job {
  id: u64,
  work: Box<dyn FnOnce() + Send + 'static>,
  interrupt: Option<CancellationToken>,
}

impl Job {
  pub fn new<F>(f: F) -> Self
  where
    F: FnOnce() + Send + 'static,
  {
    Self {
      id: next_job_id(),
      work: Box::new(f),
      interrupt: None,
    }
  }

  pub(crate) fn with_interrupt(id: u64, work: Box<dyn FnOnce() + Send + 'static>, interrupt: CancellationToken) -> Self {
    Self {
      id,
      work,
      interrupt: Some(interrupt),
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn info(&self) -> JobInfo {
    JobInfo {
      id: self.id,
      has_handle: self.interrupt.is_some(),
    }
  }

  pub(crate) fn interrupt_token(&self) -> Option<&CancellationToken> {
    self.interrupt.as_ref()
  }

  /// Runs the job on the calling thread.
  pub fn run(self) {
    (self.work)()
  }
}

impl fmt::Debug for Job {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Job")
      .field("id", &self.id)
      .field("has_handle", &self.interrupt.is_some())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicBool;
  use std::sync::Arc;

  #[test]
  fn test_job_ids_are_unique_and_increasing() {
    let a = Job::new(|| {});
    let b = Job::new(|| {});
    assert!(b.id() > a.id());
    assert!(!a.info().has_handle);
  }

  #[test]
  fn test_fixed_result_adapter_runs_action_then_returns_value() {
    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = ran.clone();
    let c = with_result(move || ran_clone.store(true, AtomicOrdering::SeqCst), "fixed");
    assert_eq!(c().unwrap(), "fixed");
    assert!(ran.load(AtomicOrdering::SeqCst));
  }

  #[test]
  fn test_fallible_maps_error_into_box() {
    let c: Callable<u32> = fallible(|| Err::<u32, _>(std::io::Error::new(std::io::ErrorKind::Other, "nope")));
    let err = c().unwrap_err();
    assert_eq!(err.to_string(), "nope");

    let ok = callable(|| 7);
    assert_eq!(ok().unwrap(), 7);
  }
}
