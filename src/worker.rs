use crate::error::TaskFailure;
use crate::executor::Shared;
use crate::task::JobInfo;

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn};

/// Observability callbacks around each job the worker runs.
///
/// A panic escaping either hook is treated like a panicking job: the worker
/// thread is retired and replaced.
pub trait ExecutionHooks: Send + Sync {
  fn before_execute(&self, _worker: &WorkerView, _job: &JobInfo) {}

  /// `failure` is set when the job panicked. For a raw job (one run through
  /// `execute`), a panic retires the worker once this hook returns.
  fn after_execute(&self, _job: &JobInfo, _failure: Option<&TaskFailure>) {}
}

impl<H: ExecutionHooks + ?Sized> ExecutionHooks for Arc<H> {
  fn before_execute(&self, worker: &WorkerView, job: &JobInfo) {
    (**self).before_execute(worker, job)
  }

  fn after_execute(&self, job: &JobInfo, failure: Option<&TaskFailure>) {
    (**self).after_execute(job, failure)
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl ExecutionHooks for NoopHooks {}

/// Read-only view of a worker thread. Exposes interrogation only; the thread
/// itself cannot be reached through it.
#[derive(Clone)]
pub struct WorkerView {
  name: Option<String>,
  thread_id: ThreadId,
  generation: u64,
  pub(crate) interrupt: CancellationToken,
  finished: Arc<AtomicBool>,
}

impl WorkerView {
  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn thread_id(&self) -> ThreadId {
    self.thread_id
  }

  /// 1 for the first worker, incremented for every replacement.
  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// Whether `shutdown_now` requested this worker's interruption.
  pub fn is_interrupted(&self) -> bool {
    self.interrupt.is_cancelled()
  }

  /// Whether the worker's loop has exited.
  pub fn is_finished(&self) -> bool {
    self.finished.load(AtomicOrdering::SeqCst)
  }
}

impl fmt::Debug for WorkerView {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerView")
      .field("name", &self.name)
      .field("thread_id", &self.thread_id)
      .field("generation", &self.generation)
      .field("interrupted", &self.is_interrupted())
      .field("finished", &self.is_finished())
      .finish()
  }
}

thread_local! {
  static INTERRUPT_TOKENS: RefCell<(Option<CancellationToken>, Option<CancellationToken>)> =
    const { RefCell::new((None, None)) };
}

/// Returns `true` when called from a task whose interruption was requested,
/// either by cancelling its handle with `may_interrupt_if_running` or by
/// `shutdown_now` on the executor running it. Long tasks should poll this.
pub fn is_interrupted() -> bool {
  INTERRUPT_TOKENS.with(|tokens| {
    let tokens = tokens.borrow();
    tokens.0.as_ref().is_some_and(CancellationToken::is_cancelled)
      || tokens.1.as_ref().is_some_and(CancellationToken::is_cancelled)
  })
}

/// Installs the interruption tokens `is_interrupted` reads on this thread,
/// restoring the previous ones on drop.
pub(crate) struct InterruptScope {
  previous: Option<(Option<CancellationToken>, Option<CancellationToken>)>,
}

impl InterruptScope {
  pub(crate) fn enter(worker: Option<&CancellationToken>, task: Option<&CancellationToken>) -> Self {
    let previous = INTERRUPT_TOKENS.with(|tokens| tokens.replace((worker.cloned(), task.cloned())));
    Self {
      previous: Some(previous),
    }
  }
}

impl Drop for InterruptScope {
  fn drop(&mut self) {
    if let Some(previous) = self.previous.take() {
      INTERRUPT_TOKENS.with(|tokens| *tokens.borrow_mut() = previous);
    }
  }
}

/// Starts a new worker thread and installs it as the executor's current
/// worker. Returns the new worker's generation.
pub(crate) fn spawn_worker(shared: &Arc<Shared>) -> io::Result<u64> {
  let mut slot = shared.worker.lock();
  let generation = shared.generation.fetch_add(1, AtomicOrdering::SeqCst) + 1;
  let interrupt = CancellationToken::new();
  let finished = Arc::new(AtomicBool::new(false));

  let worker_shared = shared.clone();
  let worker_interrupt = interrupt.clone();
  let worker_finished = finished.clone();
  let join_handle = shared.thread_factory.new_thread(Box::new(move || {
    run_worker(worker_shared, generation, worker_interrupt, worker_finished);
  }))?;

  let thread = join_handle.thread();
  *slot = Some(WorkerView {
    name: thread.name().map(str::to_owned),
    thread_id: thread.id(),
    generation,
    interrupt,
    finished,
  });
  debug!(executor = %shared.name, generation, thread = ?thread.name(), "Worker thread created.");
  Ok(generation)
}

fn run_worker(shared: Arc<Shared>, generation: u64, interrupt: CancellationToken, finished: Arc<AtomicBool>) {
  let current = thread::current();
  let view = WorkerView {
    name: current.name().map(str::to_owned),
    thread_id: current.id(),
    generation,
    interrupt,
    finished,
  };
  let span = info_span!("reusable_executor_worker", executor = %shared.name, generation);
  let _entered = span.enter();
  info!("Worker loop started.");

  let exit = {
    let _scope = InterruptScope::enter(Some(&view.interrupt), None);
    run_loop(&shared, &view)
  };
  view.finished.store(true, AtomicOrdering::SeqCst);

  match exit {
    Ok(()) => {
      shared.lifecycle.terminate();
      info!(
        tasks_executed = shared.tasks_executed.load(AtomicOrdering::SeqCst),
        "Worker loop stopped. Executor terminated."
      );
    }
    Err(failure) => {
      error!(%failure, "Unhandled failure escaped the worker loop. Replacing worker.");
      replace_worker(&shared);
    }
  }
}

/// Runs jobs until shutdown leaves the queue empty. `Err` carries a failure
/// that escaped a raw job or a hook.
fn run_loop(shared: &Shared, view: &WorkerView) -> Result<(), TaskFailure> {
  shared.lifecycle.mark_idle();

  while let Some(job) = shared.queue.take(&shared.stop) {
    shared.lifecycle.mark_running();
    let info = job.info();
    let task_interrupt = job.interrupt_token().cloned();
    debug!(task_id = info.id, "Dequeued task. Executing.");

    let outcome = {
      let _scope = InterruptScope::enter(Some(&view.interrupt), task_interrupt.as_ref());
      panic::catch_unwind(AssertUnwindSafe(|| {
        shared.hooks.before_execute(view, &info);
        job.run();
      }))
    };
    let failure = outcome.err().map(TaskFailure::from_panic);
    let hook_outcome = panic::catch_unwind(AssertUnwindSafe(|| {
      shared.hooks.after_execute(&info, failure.as_ref());
    }));

    shared.lifecycle.mark_idle();
    let executed = shared.tasks_executed.fetch_add(1, AtomicOrdering::SeqCst) + 1;
    trace!(task_id = info.id, executed, "Task finished.");

    if let Some(failure) = failure {
      return Err(failure);
    }
    if let Err(payload) = hook_outcome {
      return Err(TaskFailure::from_panic(payload));
    }
    if shared.lifecycle.get().is_shutdown() && shared.queue.is_empty() {
      debug!("Shutdown requested and queue empty. Leaving worker loop.");
      break;
    }
  }
  Ok(())
}

/// Called from a worker that is exiting abruptly. Starts a replacement while
/// the executor can still accept or has pending work; terminates otherwise.
fn replace_worker(shared: &Arc<Shared>) {
  let state = shared.lifecycle.get();
  if state.is_shutdown() && shared.queue.is_empty() {
    info!(%state, "No work left for a replacement worker. Executor terminated.");
    shared.lifecycle.terminate();
    return;
  }

  match spawn_worker(shared) {
    Ok(generation) => info!(generation, "Replacement worker started."),
    Err(spawn_error) => {
      error!(%spawn_error, "Failed to start a replacement worker. Terminating executor.");
      // Dropping the stranded jobs cancels their handles.
      let stranded = shared.queue.drain();
      if !stranded.is_empty() {
        warn!(stranded = stranded.len(), "Dropping queued tasks left without a worker.");
      }
      drop(stranded);
      shared.lifecycle.terminate();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_is_interrupted_follows_scope() {
    assert!(!is_interrupted());
    let worker = CancellationToken::new();
    let task = CancellationToken::new();
    {
      let _outer = InterruptScope::enter(Some(&worker), None);
      assert!(!is_interrupted());
      {
        let _inner = InterruptScope::enter(Some(&worker), Some(&task));
        task.cancel();
        assert!(is_interrupted());
      }
      assert!(!is_interrupted(), "task token is gone once its scope ends");
      worker.cancel();
      assert!(is_interrupted());
    }
    assert!(!is_interrupted());
  }
}
