use crate::error::{ExecutorError, TaskFailure};
use crate::task::{next_job_id, Callable, Job};

use std::fmt;
use std::future::poll_fn;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Observable lifecycle of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl TaskState {
  pub fn is_terminal(self) -> bool {
    matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
  }
}

enum Outcome<R> {
  Pending,
  Running,
  // `None` once the value has been taken.
  Completed(Option<R>),
  Failed(TaskFailure),
  Cancelled,
}

impl<R> Outcome<R> {
  fn state(&self) -> TaskState {
    match self {
      Outcome::Pending => TaskState::Pending,
      Outcome::Running => TaskState::Running,
      Outcome::Completed(_) => TaskState::Completed,
      Outcome::Failed(_) => TaskState::Failed,
      Outcome::Cancelled => TaskState::Cancelled,
    }
  }
}

type Listener = Box<dyn FnOnce() + Send + 'static>;

struct Inner<R> {
  outcome: Outcome<R>,
  listeners: Vec<Listener>,
  waker: Option<Waker>,
}

/// Shared state between a [`TaskHandle`] and the job that completes it.
pub(crate) struct FutureCell<R> {
  task_id: u64,
  inner: Mutex<Inner<R>>,
  done: Condvar,
  interrupt: CancellationToken,
}

impl<R: Send + 'static> FutureCell<R> {
  fn new(task_id: u64) -> Self {
    Self {
      task_id,
      inner: Mutex::new(Inner {
        outcome: Outcome::Pending,
        listeners: Vec::new(),
        waker: None,
      }),
      done: Condvar::new(),
      interrupt: CancellationToken::new(),
    }
  }

  pub(crate) fn state(&self) -> TaskState {
    self.inner.lock().outcome.state()
  }

  /// `Pending -> Running`. Returns `false` if the task was cancelled first.
  fn start(&self) -> bool {
    let mut inner = self.inner.lock();
    match inner.outcome {
      Outcome::Pending => {
        inner.outcome = Outcome::Running;
        true
      }
      _ => false,
    }
  }

  /// Records the outcome of a running task. A task cancelled while running
  /// keeps its `Cancelled` state and the result is dropped.
  fn finish(&self, result: Result<R, TaskFailure>) {
    let mut inner = self.inner.lock();
    if !matches!(inner.outcome, Outcome::Running) {
      trace!(task_id = %self.task_id, "Discarding result of a task that was cancelled while running.");
      return;
    }
    inner.outcome = match result {
      Ok(value) => Outcome::Completed(Some(value)),
      Err(failure) => Outcome::Failed(failure),
    };
    self.complete(inner);
  }

  /// Moves a non-terminal cell to `Cancelled`.
  fn cancel(&self, may_interrupt_if_running: bool) -> bool {
    let mut inner = self.inner.lock();
    match inner.outcome {
      Outcome::Pending => {}
      Outcome::Running if may_interrupt_if_running => {
        self.interrupt.cancel();
      }
      _ => return false,
    }
    inner.outcome = Outcome::Cancelled;
    self.complete(inner);
    true
  }

  /// Wakes every waiter and fires listeners outside the lock.
  fn complete(&self, mut inner: parking_lot::MutexGuard<'_, Inner<R>>) {
    let listeners = mem::take(&mut inner.listeners);
    let waker = inner.waker.take();
    drop(inner);
    self.done.notify_all();
    if let Some(waker) = waker {
      waker.wake();
    }
    for listener in listeners {
      listener();
    }
  }

  /// Runs `listener` once the cell is terminal (immediately if it already is).
  pub(crate) fn on_done(&self, listener: impl FnOnce() + Send + 'static) {
    let mut inner = self.inner.lock();
    if inner.outcome.state().is_terminal() {
      drop(inner);
      listener();
    } else {
      inner.listeners.push(Box::new(listener));
    }
  }

  fn wait(&self) {
    let mut inner = self.inner.lock();
    while !inner.outcome.state().is_terminal() {
      self.done.wait(&mut inner);
    }
  }

  /// Waits until terminal or `deadline`. Returns whether the cell is terminal.
  pub(crate) fn wait_until(&self, deadline: Instant) -> bool {
    let mut inner = self.inner.lock();
    while !inner.outcome.state().is_terminal() {
      if self.done.wait_until(&mut inner, deadline).timed_out() {
        return inner.outcome.state().is_terminal();
      }
    }
    true
  }

  /// Takes the terminal outcome. Must only be called once the cell is terminal.
  pub(crate) fn take_result(&self) -> Result<R, ExecutorError> {
    let mut inner = self.inner.lock();
    match &mut inner.outcome {
      Outcome::Completed(value) => value.take().ok_or(ExecutorError::ResultUnavailable),
      Outcome::Failed(failure) => Err(ExecutorError::TaskFailed(failure.clone())),
      Outcome::Cancelled => Err(ExecutorError::TaskCancelled),
      Outcome::Pending | Outcome::Running => Err(ExecutorError::ResultUnavailable),
    }
  }

  fn failure(&self) -> Option<TaskFailure> {
    match &self.inner.lock().outcome {
      Outcome::Failed(failure) => Some(failure.clone()),
      _ => None,
    }
  }

  fn poll_terminal(&self, waker: &Waker) -> bool {
    let mut inner = self.inner.lock();
    if inner.outcome.state().is_terminal() {
      return true;
    }
    match &inner.waker {
      Some(existing) if existing.will_wake(waker) => {}
      _ => inner.waker = Some(waker.clone()),
    }
    false
  }
}

/// The executing half of a handle: owns the callable until it runs. Dropping it
/// unrun cancels the handle, so a discarded or drained job never strands a
/// waiter.
struct FutureTask<R: Send + 'static> {
  cell: Arc<FutureCell<R>>,
  callable: Option<Callable<R>>,
}

impl<R: Send + 'static> FutureTask<R> {
  fn run(mut self) {
    let callable = match self.callable.take() {
      Some(callable) => callable,
      None => return,
    };
    if !self.cell.start() {
      debug!(task_id = %self.cell.task_id, "Dequeued task already cancelled.");
      return;
    }
    let result = match panic::catch_unwind(AssertUnwindSafe(callable)) {
      Ok(Ok(value)) => Ok(value),
      Ok(Err(err)) => Err(TaskFailure::from_error(err)),
      Err(payload) => Err(TaskFailure::from_panic(payload)),
    };
    self.cell.finish(result);
  }
}

impl<R: Send + 'static> Drop for FutureTask<R> {
  fn drop(&mut self) {
    if self.callable.is_some() && self.cell.cancel(false) {
      debug!(task_id = %self.cell.task_id, "Task dropped before it ran; handle cancelled.");
    }
  }
}

/// Wraps `callable` into a queueable [`Job`] and the [`TaskHandle`] it completes.
pub(crate) fn new_task<R: Send + 'static>(callable: Callable<R>) -> (Job, TaskHandle<R>) {
  let task_id = next_job_id();
  let cell = Arc::new(FutureCell::new(task_id));
  let future_task = FutureTask {
    cell: cell.clone(),
    callable: Some(callable),
  };
  let job = Job::with_interrupt(task_id, Box::new(move || future_task.run()), cell.interrupt.clone());
  (job, TaskHandle { cell })
}

/// A handle to a task submitted to a [`ReusableExecutor`](crate::ReusableExecutor).
///
/// Allows requesting cancellation, inspecting the task's state, and waiting for
/// its result either by blocking or with `.await`.
pub struct TaskHandle<R: Send + 'static> {
  pub(crate) cell: Arc<FutureCell<R>>,
}

impl<R: Send + 'static> TaskHandle<R> {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.cell.task_id
  }

  pub fn state(&self) -> TaskState {
    self.cell.state()
  }

  pub fn is_done(&self) -> bool {
    self.state().is_terminal()
  }

  pub fn is_cancelled(&self) -> bool {
    self.state() == TaskState::Cancelled
  }

  /// Requests cancellation.
  ///
  /// A pending task is cancelled and will never run. A running task is only
  /// cancelled when `may_interrupt_if_running` is set: its result is discarded
  /// and [`is_interrupted`](crate::is_interrupted) turns true inside it.
  /// Returns `false` if the task was already terminal or could not be cancelled.
  pub fn cancel(&self, may_interrupt_if_running: bool) -> bool {
    let cancelled = self.cell.cancel(may_interrupt_if_running);
    if cancelled {
      debug!(task_id = %self.cell.task_id, "TaskHandle: Cancelled.");
    }
    cancelled
  }

  /// Blocks until the task is terminal.
  pub fn wait(&self) {
    self.cell.wait()
  }

  /// Blocks until the task is terminal or `timeout` elapses. Returns whether
  /// the task is terminal.
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    match Instant::now().checked_add(timeout) {
      Some(deadline) => self.cell.wait_until(deadline),
      None => {
        self.cell.wait();
        true
      }
    }
  }

  /// The failure of a failed task, without consuming the handle.
  pub fn failure(&self) -> Option<TaskFailure> {
    self.cell.failure()
  }

  /// Blocks until the task is terminal and returns its result.
  ///
  /// # Errors
  /// Returns `ExecutorError::TaskFailed` if the task panicked or returned an error.
  /// Returns `ExecutorError::TaskCancelled` if the task was cancelled.
  pub fn get(self) -> Result<R, ExecutorError> {
    self.cell.wait();
    self.cell.take_result()
  }

  /// Awaits the completion of the task and returns its result.
  pub async fn await_result(self) -> Result<R, ExecutorError> {
    poll_fn(|cx| {
      if self.cell.poll_terminal(cx.waker()) {
        Poll::Ready(())
      } else {
        Poll::Pending
      }
    })
    .await;
    self.cell.take_result()
  }
}

impl<R: Send + 'static> fmt::Debug for TaskHandle<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskHandle")
      .field("task_id", &self.cell.task_id)
      .field("state", &self.state())
      .finish()
  }
}
