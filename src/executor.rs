use crate::builder::ExecutorBuilder;
use crate::error::{BoxError, ExecutorError};
use crate::handle::{new_task, TaskHandle};
use crate::queue::BlockingQueue;
use crate::rejection::RejectionPolicy;
use crate::state::{ExecutorState, Lifecycle};
use crate::task::{callable, fallible, with_result, Callable, Job};
use crate::thread_factory::ThreadFactory;
use crate::worker::{spawn_worker, ExecutionHooks, WorkerView};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// State shared between the executor handle and its worker thread(s).
pub(crate) struct Shared {
  pub(crate) name: Arc<String>,
  pub(crate) queue: Arc<dyn BlockingQueue<Job>>,
  pub(crate) lifecycle: Lifecycle,
  /// Cancelled when shutdown begins; releases a worker blocked on an empty queue.
  pub(crate) stop: CancellationToken,
  pub(crate) hooks: Arc<dyn ExecutionHooks>,
  pub(crate) thread_factory: Arc<dyn ThreadFactory>,
  pub(crate) tasks_executed: AtomicU64,
  /// Guards the current worker so replacement never races `shutdown_now`.
  pub(crate) worker: Mutex<Option<WorkerView>>,
  pub(crate) generation: AtomicU64,
}

impl Shared {
  fn begin_shutdown(&self) -> bool {
    self.lifecycle.begin_shutdown(|| {
      self.stop.cancel();
      self.queue.wake_consumers();
    })
  }
}

pub(crate) struct ExecutorParts {
  pub(crate) name: String,
  pub(crate) queue: Arc<dyn BlockingQueue<Job>>,
  pub(crate) thread_factory: Arc<dyn ThreadFactory>,
  pub(crate) rejection_policy: RejectionPolicy,
  pub(crate) hooks: Arc<dyn ExecutionHooks>,
}

/// An executor backed by exactly one persistent worker thread.
///
/// Tasks run one at a time in FIFO order. A worker thread that dies from an
/// unhandled failure is replaced transparently; queue, policy and counters
/// survive. Dropping the executor starts a graceful shutdown.
pub struct ReusableExecutor {
  shared: Arc<Shared>,
  rejection_policy: RejectionPolicy,
}

impl ReusableExecutor {
  /// An executor with an unbounded queue, indexed thread names and the
  /// `Abort` rejection policy.
  pub fn new() -> Result<Self, ExecutorError> {
    ExecutorBuilder::new().build()
  }

  /// Like [`new`](Self::new) but with a bounded queue.
  pub fn with_queue_capacity(capacity: usize) -> Result<Self, ExecutorError> {
    ExecutorBuilder::new().queue_capacity(capacity).build()
  }

  pub fn builder() -> ExecutorBuilder {
    ExecutorBuilder::new()
  }

  pub(crate) fn start(parts: ExecutorParts) -> Result<Self, ExecutorError> {
    let shared = Arc::new(Shared {
      name: Arc::new(parts.name),
      queue: parts.queue,
      lifecycle: Lifecycle::new(),
      stop: CancellationToken::new(),
      hooks: parts.hooks,
      thread_factory: parts.thread_factory,
      tasks_executed: AtomicU64::new(0),
      worker: Mutex::new(None),
      generation: AtomicU64::new(0),
    });

    spawn_worker(&shared)?;
    info!(
      executor = %shared.name,
      capacity = ?shared.queue.capacity(),
      policy = ?parts.rejection_policy,
      "Executor started."
    );

    Ok(Self {
      shared,
      rejection_policy: parts.rejection_policy,
    })
  }

  pub fn name(&self) -> &str {
    &self.shared.name
  }

  pub fn state(&self) -> ExecutorState {
    self.shared.lifecycle.get()
  }

  pub fn is_shutdown(&self) -> bool {
    self.state().is_shutdown()
  }

  pub fn is_terminated(&self) -> bool {
    self.state() == ExecutorState::Terminated
  }

  /// Number of tasks the worker has dequeued and run, successfully or not.
  pub fn tasks_executed(&self) -> u64 {
    self.shared.tasks_executed.load(AtomicOrdering::SeqCst)
  }

  /// Returns the current number of tasks in the pending queue.
  pub fn queue_len(&self) -> usize {
    self.shared.queue.len()
  }

  /// `None` for an unbounded queue.
  pub fn queue_capacity(&self) -> Option<usize> {
    self.shared.queue.capacity()
  }

  /// A read-only view of the current worker thread.
  pub fn worker(&self) -> Option<WorkerView> {
    self.shared.worker.lock().clone()
  }

  pub fn rejection_policy(&self) -> &RejectionPolicy {
    &self.rejection_policy
  }

  /// Queues `f` for execution. Never blocks, except under `CallerRuns` when
  /// the job is rejected.
  pub fn execute<F>(&self, f: F) -> Result<(), ExecutorError>
  where
    F: FnOnce() + Send + 'static,
  {
    self.execute_job(Some(Job::new(f)))
  }

  /// Queues `job`, or hands it to the rejection policy when the executor is
  /// shutting down or the queue is full.
  ///
  /// # Errors
  /// Returns `ExecutorError::NullTask` for `None`.
  /// Returns `ExecutorError::Rejected` when rejected under the `Abort` policy.
  pub fn execute_job(&self, job: Option<Job>) -> Result<(), ExecutorError> {
    let job = job.ok_or(ExecutorError::NullTask)?;
    let task_id = job.id();

    match self.shared.lifecycle.admit(job, |job| self.shared.queue.offer(job)) {
      Ok(()) => {
        trace!(executor = %self.shared.name, task_id, "Task queued.");
        Ok(())
      }
      Err(job) => {
        if self.is_shutdown() {
          debug!(executor = %self.shared.name, task_id, "Submit: Executor is shutting down or terminated.");
        } else {
          debug!(executor = %self.shared.name, task_id, "Submit: Queue is full.");
        }
        self.rejection_policy.reject(job, self)
      }
    }
  }

  /// Submits an infallible closure and returns a handle to its result.
  pub fn submit<R, F>(&self, f: F) -> Result<TaskHandle<R>, ExecutorError>
  where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
  {
    self.submit_callable(callable(f))
  }

  /// Submits a closure returning `Result`; an `Err` fails the handle.
  pub fn submit_fallible<R, E, F>(&self, f: F) -> Result<TaskHandle<R>, ExecutorError>
  where
    R: Send + 'static,
    E: Into<BoxError>,
    F: FnOnce() -> Result<R, E> + Send + 'static,
  {
    self.submit_callable(fallible(f))
  }

  /// Submits a no-result action whose handle resolves to `result`.
  pub fn submit_with_result<R, F>(&self, action: F, result: R) -> Result<TaskHandle<R>, ExecutorError>
  where
    R: Send + 'static,
    F: FnOnce() + Send + 'static,
  {
    self.submit_callable(with_result(action, result))
  }

  pub fn submit_callable<R: Send + 'static>(&self, task: Callable<R>) -> Result<TaskHandle<R>, ExecutorError> {
    let (job, handle) = new_task(task);
    self.execute_job(Some(job))?;
    Ok(handle)
  }

  /// Stops admitting tasks. Already queued tasks still run. Idempotent.
  pub fn shutdown(&self) {
    if self.shared.begin_shutdown() {
      info!(executor = %self.shared.name, queued = self.queue_len(), "Initiating graceful shutdown.");
    } else {
      trace!(executor = %self.shared.name, "Shutdown already in progress or completed.");
    }
  }

  /// Stops admitting tasks, requests interruption of the running task and
  /// returns every task still queued. A task already dequeued is not returned.
  pub fn shutdown_now(&self) -> Vec<Job> {
    if self.is_terminated() {
      return Vec::new();
    }
    let worker = self.shared.worker.lock();
    if self.is_terminated() {
      return Vec::new();
    }

    self.shared.begin_shutdown();
    if let Some(view) = worker.as_ref() {
      view.interrupt.cancel();
    }
    let drained = self.shared.queue.drain();
    info!(executor = %self.shared.name, drained = drained.len(), "Forceful shutdown: worker interrupted, queue drained.");
    drained
  }

  /// Blocks until the executor has terminated or `timeout` elapses. Returns
  /// whether termination happened in time.
  pub fn await_termination(&self, timeout: Duration) -> bool {
    self.shared.lifecycle.await_termination(timeout)
  }
}

impl fmt::Display for ReusableExecutor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "ReusableExecutor[name={}, queue_size={}, tasks_executed={}, state={}]",
      self.shared.name,
      self.queue_len(),
      self.tasks_executed(),
      self.state()
    )
  }
}

impl fmt::Debug for ReusableExecutor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ReusableExecutor")
      .field("name", &self.shared.name)
      .field("state", &self.state())
      .field("queue_len", &self.queue_len())
      .field("tasks_executed", &self.tasks_executed())
      .field("rejection_policy", &self.rejection_policy)
      .field("worker", &self.worker())
      .finish()
  }
}

impl Drop for ReusableExecutor {
  fn drop(&mut self) {
    if self.shared.begin_shutdown() {
      info!(
        executor = %self.shared.name,
        "ReusableExecutor dropped without explicit shutdown. Queued tasks will still run."
      );
    }
  }
}
