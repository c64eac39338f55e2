use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::trace;

/// Lifecycle phase of an executor.
///
/// `New -> Idle <-> Running -> ShuttingDown -> Terminated`. `Idle` and
/// `Running` cycle freely; once `ShuttingDown` is reached the state only moves
/// forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExecutorState {
  /// Constructed; the worker has not yet started pulling from the queue.
  New,
  /// The worker is waiting for a task.
  Idle,
  /// The worker is executing a task.
  Running,
  /// No new tasks are admitted; queued tasks still run.
  ShuttingDown,
  /// Shut down and the worker has exited.
  Terminated,
}

impl ExecutorState {
  pub fn can_transition_to(self, next: ExecutorState) -> bool {
    use ExecutorState::*;
    matches!(
      (self, next),
      (New, Idle)
        | (Idle, Running)
        | (Running, Idle)
        | (New | Idle | Running, ShuttingDown)
        | (ShuttingDown, Terminated)
    )
  }

  pub fn accepts_tasks(self) -> bool {
    matches!(self, ExecutorState::New | ExecutorState::Idle | ExecutorState::Running)
  }

  pub fn is_shutdown(self) -> bool {
    !self.accepts_tasks()
  }
}

impl fmt::Display for ExecutorState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ExecutorState::New => "new",
      ExecutorState::Idle => "idle",
      ExecutorState::Running => "running",
      ExecutorState::ShuttingDown => "shutting-down",
      ExecutorState::Terminated => "terminated",
    };
    f.write_str(s)
  }
}

/// Holds the executor state, gates admission against the shutdown transition,
/// and lets callers wait for termination.
///
/// Lock order: `admission` before `state`.
pub(crate) struct Lifecycle {
  state: Mutex<ExecutorState>,
  terminated: Condvar,
  admission: RwLock<()>,
}

impl Lifecycle {
  pub(crate) fn new() -> Self {
    Self {
      state: Mutex::new(ExecutorState::New),
      terminated: Condvar::new(),
      admission: RwLock::new(()),
    }
  }

  pub(crate) fn get(&self) -> ExecutorState {
    *self.state.lock()
  }

  fn transition(&self, state: &mut ExecutorState, next: ExecutorState) -> bool {
    if state.can_transition_to(next) {
      trace!(from = %*state, to = %next, "Executor state transition.");
      *state = next;
      true
    } else {
      false
    }
  }

  /// `New|Running -> Idle`. No effect once shutting down.
  pub(crate) fn mark_idle(&self) -> bool {
    let mut state = self.state.lock();
    self.transition(&mut state, ExecutorState::Idle)
  }

  /// `Idle -> Running`. No effect once shutting down.
  pub(crate) fn mark_running(&self) -> bool {
    let mut state = self.state.lock();
    self.transition(&mut state, ExecutorState::Running)
  }

  /// Hands `item` to `offer` while the executor still accepts tasks, holding
  /// the admission gate so `begin_shutdown` cannot interleave. The item comes
  /// back in `Err` when shut down or when `offer` refuses it.
  pub(crate) fn admit<T>(&self, item: T, offer: impl FnOnce(T) -> Result<(), T>) -> Result<(), T> {
    let _gate = self.admission.read();
    if self.get().accepts_tasks() {
      offer(item)
    } else {
      Err(item)
    }
  }

  /// Moves to `ShuttingDown` and runs `on_transition` inside the admission
  /// gate. Returns `false` if shutdown had already begun.
  pub(crate) fn begin_shutdown(&self, on_transition: impl FnOnce()) -> bool {
    let _gate = self.admission.write();
    let mut state = self.state.lock();
    if !self.transition(&mut state, ExecutorState::ShuttingDown) {
      return false;
    }
    drop(state);
    on_transition();
    true
  }

  /// Forces `Terminated`, passing through `ShuttingDown` if needed, and wakes
  /// every `await_termination` caller.
  pub(crate) fn terminate(&self) {
    let _gate = self.admission.write();
    let mut state = self.state.lock();
    if state.accepts_tasks() {
      self.transition(&mut state, ExecutorState::ShuttingDown);
    }
    self.transition(&mut state, ExecutorState::Terminated);
    drop(state);
    self.terminated.notify_all();
  }

  /// Blocks until `Terminated` or `timeout`. Returns whether termination occurred.
  /// A timeout too large to form a deadline waits without one.
  pub(crate) fn await_termination(&self, timeout: Duration) -> bool {
    let mut state = self.state.lock();
    let Some(deadline) = Instant::now().checked_add(timeout) else {
      while *state != ExecutorState::Terminated {
        self.terminated.wait(&mut state);
      }
      return true;
    };
    while *state != ExecutorState::Terminated {
      if self.terminated.wait_until(&mut state, deadline).timed_out() {
        return *state == ExecutorState::Terminated;
      }
    }
    true
  }
}
