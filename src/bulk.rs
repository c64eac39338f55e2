//! `invoke_all` and `invoke_any`: many submissions composed into one result,
//! with one absolute deadline shared by every wait.

use crate::completion::{next_slice, CompletionQueue};
use crate::error::{ExecutorError, TaskFailure};
use crate::executor::ReusableExecutor;
use crate::handle::{new_task, FutureCell, TaskHandle};
use crate::task::{Callable, Job};

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// `None` waits without a deadline, also for timeouts too large to form one.
fn deadline_from(timeout: Option<Duration>) -> Option<Instant> {
  timeout.and_then(|timeout| Instant::now().checked_add(timeout))
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
  deadline.is_some_and(|deadline| deadline <= Instant::now())
}

fn cancel_all<R: Send + 'static>(handles: &[TaskHandle<R>]) {
  for handle in handles {
    handle.cancel(true);
  }
}

/// Waits for `cell` to become terminal, re-checking `interrupt` between
/// bounded waits.
fn wait_terminal<R: Send + 'static>(
  cell: &FutureCell<R>,
  deadline: Option<Instant>,
  interrupt: &CancellationToken,
) -> Result<(), ExecutorError> {
  loop {
    if cell.state().is_terminal() {
      return Ok(());
    }
    cell.wait_until(next_slice(deadline, interrupt)?);
  }
}

impl ReusableExecutor {
  /// Runs every task and waits for all of them. Individual failures stay on
  /// their handles. Handles are returned in input order.
  ///
  /// # Errors
  /// Returns the rejection error if a task could not be submitted; every
  /// handle is cancelled first.
  pub fn invoke_all<R, I>(&self, tasks: I) -> Result<Vec<TaskHandle<R>>, ExecutorError>
  where
    R: Send + 'static,
    I: IntoIterator<Item = Callable<R>>,
  {
    self.invoke_all_interruptible(tasks, None, &CancellationToken::new())
  }

  /// Like [`invoke_all`](Self::invoke_all), bounded by `timeout`. Tasks not
  /// submitted before the deadline never run; handles not terminal at the
  /// deadline are cancelled. Every returned handle is terminal.
  pub fn invoke_all_timeout<R, I>(&self, tasks: I, timeout: Duration) -> Result<Vec<TaskHandle<R>>, ExecutorError>
  where
    R: Send + 'static,
    I: IntoIterator<Item = Callable<R>>,
  {
    self.invoke_all_interruptible(tasks, Some(timeout), &CancellationToken::new())
  }

  /// `invoke_all` with an optional timeout and an interruption token.
  ///
  /// # Errors
  /// Returns `ExecutorError::Interrupted` if `interrupt` is cancelled while
  /// waiting; every non-terminal handle is cancelled first.
  pub fn invoke_all_interruptible<R, I>(
    &self,
    tasks: I,
    timeout: Option<Duration>,
    interrupt: &CancellationToken,
  ) -> Result<Vec<TaskHandle<R>>, ExecutorError>
  where
    R: Send + 'static,
    I: IntoIterator<Item = Callable<R>>,
  {
    let deadline = deadline_from(timeout);
    let (jobs, handles): (Vec<Job>, Vec<TaskHandle<R>>) = tasks.into_iter().map(new_task).unzip();
    debug!(executor = %self.name(), tasks = handles.len(), ?timeout, "invoke_all: submitting tasks.");

    let mut jobs = jobs.into_iter();
    for job in jobs.by_ref() {
      if deadline_passed(deadline) {
        // Dropping an unsubmitted job cancels its handle.
        debug!(executor = %self.name(), "invoke_all: deadline passed during submission.");
        break;
      }
      if let Err(err) = self.execute_job(Some(job)) {
        cancel_all(&handles);
        return Err(err);
      }
    }
    drop(jobs);

    for (index, handle) in handles.iter().enumerate() {
      match wait_terminal(&handle.cell, deadline, interrupt) {
        Ok(()) => {}
        Err(ExecutorError::Timeout) => {
          debug!(executor = %self.name(), remaining = handles.len() - index, "invoke_all: deadline reached, cancelling unfinished tasks.");
          cancel_all(&handles[index..]);
          return Ok(handles);
        }
        Err(err) => {
          debug!(executor = %self.name(), error = %err, "invoke_all: wait aborted, cancelling unfinished tasks.");
          cancel_all(&handles);
          return Err(err);
        }
      }
    }
    Ok(handles)
  }

  /// Returns the result of the first task to complete successfully and
  /// cancels the rest.
  ///
  /// # Errors
  /// `EmptyTaskSet` for no tasks; `AllTasksFailed` carrying the last failure
  /// when every task failed; a rejection error if submission failed.
  pub fn invoke_any<R, I>(&self, tasks: I) -> Result<R, ExecutorError>
  where
    R: Send + 'static,
    I: IntoIterator<Item = Callable<R>>,
  {
    self.invoke_any_interruptible(tasks, None, &CancellationToken::new())
  }

  /// Like [`invoke_any`](Self::invoke_any); returns `ExecutorError::Timeout`
  /// if no task succeeds before `timeout`.
  pub fn invoke_any_timeout<R, I>(&self, tasks: I, timeout: Duration) -> Result<R, ExecutorError>
  where
    R: Send + 'static,
    I: IntoIterator<Item = Callable<R>>,
  {
    self.invoke_any_interruptible(tasks, Some(timeout), &CancellationToken::new())
  }

  /// `invoke_any` with an optional timeout and an interruption token.
  pub fn invoke_any_interruptible<R, I>(
    &self,
    tasks: I,
    timeout: Option<Duration>,
    interrupt: &CancellationToken,
  ) -> Result<R, ExecutorError>
  where
    R: Send + 'static,
    I: IntoIterator<Item = Callable<R>>,
  {
    let deadline = deadline_from(timeout);
    let mut pending = tasks.into_iter();
    let first = pending.next().ok_or(ExecutorError::EmptyTaskSet)?;

    let completions = CompletionQueue::new();
    let mut handles = Vec::new();
    let result = self.race(first, &mut pending, &mut handles, &completions, deadline, interrupt);
    cancel_all(&handles);
    debug!(executor = %self.name(), submitted = handles.len(), success = result.is_ok(), "invoke_any: finished.");
    result
  }

  fn race<R: Send + 'static>(
    &self,
    first: Callable<R>,
    pending: &mut dyn Iterator<Item = Callable<R>>,
    handles: &mut Vec<TaskHandle<R>>,
    completions: &CompletionQueue,
    deadline: Option<Instant>,
    interrupt: &CancellationToken,
  ) -> Result<R, ExecutorError> {
    let mut last_failure: Option<TaskFailure> = None;
    self.submit_watched(first, handles, completions)?;
    let mut active = 1usize;

    loop {
      let index = match completions.poll() {
        Some(index) => index,
        None => {
          if let Some(task) = pending.next() {
            self.submit_watched(task, handles, completions)?;
            active += 1;
            continue;
          }
          if active == 0 {
            break;
          }
          completions.take(deadline, interrupt)?
        }
      };
      active -= 1;

      match handles[index].cell.take_result() {
        Ok(value) => {
          debug!(executor = %self.name(), task_id = handles[index].id(), "invoke_any: first successful task.");
          return Ok(value);
        }
        Err(ExecutorError::TaskFailed(failure)) => last_failure = Some(failure),
        Err(other) => last_failure = Some(TaskFailure::from_error(Box::new(other))),
      }
    }

    match last_failure {
      Some(last) => Err(ExecutorError::AllTasksFailed { last }),
      None => Err(ExecutorError::ResultUnavailable),
    }
  }

  fn submit_watched<R: Send + 'static>(
    &self,
    task: Callable<R>,
    handles: &mut Vec<TaskHandle<R>>,
    completions: &CompletionQueue,
  ) -> Result<(), ExecutorError> {
    let (job, handle) = new_task(task);
    completions.watch(&handle, handles.len());
    handles.push(handle);
    self.execute_job(Some(job))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::callable;

  #[test]
  fn test_wait_terminal_reports_timeout_for_unrun_task() {
    let (_job, handle) = new_task(callable(|| ()));
    let result = wait_terminal(&handle.cell, Some(Instant::now() + Duration::from_millis(20)), &CancellationToken::new());
    assert!(matches!(result, Err(ExecutorError::Timeout)));
  }

  #[test]
  fn test_wait_terminal_zero_budget_is_timed_out_now() {
    let (_job, handle) = new_task(callable(|| ()));
    let result = wait_terminal(&handle.cell, deadline_from(Some(Duration::ZERO)), &CancellationToken::new());
    assert!(matches!(result, Err(ExecutorError::Timeout)));
  }

  #[test]
  fn test_oversized_timeout_means_no_deadline() {
    assert_eq!(deadline_from(Some(Duration::MAX)), None);
    assert!(deadline_from(Some(Duration::from_secs(1))).is_some());
  }

  #[test]
  fn test_wait_terminal_prefers_interrupt_over_deadline() {
    let (_job, handle) = new_task(callable(|| ()));
    let interrupt = CancellationToken::new();
    interrupt.cancel();
    let result = wait_terminal(&handle.cell, None, &interrupt);
    assert!(matches!(result, Err(ExecutorError::Interrupted)));
  }
}
