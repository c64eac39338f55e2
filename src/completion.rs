use crate::error::ExecutorError;
use crate::handle::TaskHandle;

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// How often a blocked bulk wait re-checks its interruption token.
const INTERRUPT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// End of the next bounded wait of a bulk operation.
///
/// # Errors
/// `Interrupted` once `interrupt` is cancelled, then `Timeout` once `deadline`
/// has passed.
pub(crate) fn next_slice(deadline: Option<Instant>, interrupt: &CancellationToken) -> Result<Instant, ExecutorError> {
  if interrupt.is_cancelled() {
    return Err(ExecutorError::Interrupted);
  }
  let now = Instant::now();
  let slice_end = now + INTERRUPT_CHECK_INTERVAL;
  match deadline {
    Some(deadline) if deadline <= now => Err(ExecutorError::Timeout),
    Some(deadline) => Ok(deadline.min(slice_end)),
    None => Ok(slice_end),
  }
}

/// Surfaces watched handles in the order they finish, independent of the
/// order they were submitted in. Each watched handle reports its index once.
pub(crate) struct CompletionQueue {
  tx: Sender<usize>,
  rx: Receiver<usize>,
}

impl CompletionQueue {
  pub(crate) fn new() -> Self {
    let (tx, rx) = crossbeam_channel::unbounded();
    Self { tx, rx }
  }

  pub(crate) fn watch<R: Send + 'static>(&self, handle: &TaskHandle<R>, index: usize) {
    let tx = self.tx.clone();
    let task_id = handle.id();
    handle.cell.on_done(move || {
      trace!(task_id, index, "Watched task finished.");
      // The receiver is gone once the bulk call returned; nothing to report to.
      let _ = tx.send(index);
    });
  }

  /// A finished index, if one is ready.
  pub(crate) fn poll(&self) -> Option<usize> {
    match self.rx.try_recv() {
      Ok(index) => Some(index),
      Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
    }
  }

  /// Blocks for the next finished index.
  ///
  /// # Errors
  /// `Timeout` once `deadline` has passed, `Interrupted` once `interrupt` is
  /// cancelled.
  pub(crate) fn take(&self, deadline: Option<Instant>, interrupt: &CancellationToken) -> Result<usize, ExecutorError> {
    loop {
      if let Some(index) = self.poll() {
        return Ok(index);
      }
      let slice_end = next_slice(deadline, interrupt)?;
      match self.rx.recv_deadline(slice_end) {
        Ok(index) => return Ok(index),
        Err(RecvTimeoutError::Timeout) => continue,
        // `self.tx` keeps the channel open.
        Err(RecvTimeoutError::Disconnected) => return Err(ExecutorError::ResultUnavailable),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handle::new_task;
  use crate::task::callable;
  use std::thread;

  #[test]
  fn test_completion_order_is_finish_order() {
    let queue = CompletionQueue::new();
    let (first_job, first) = new_task(callable(|| 1));
    let (second_job, second) = new_task(callable(|| 2));
    queue.watch(&first, 0);
    queue.watch(&second, 1);
    assert_eq!(queue.poll(), None);

    second_job.run();
    first_job.run();
    assert_eq!(queue.poll(), Some(1));
    assert_eq!(queue.poll(), Some(0));
  }

  #[test]
  fn test_take_times_out_at_deadline() {
    let queue = CompletionQueue::new();
    let (_job, handle) = new_task(callable(|| ()));
    queue.watch(&handle, 0);
    let started = Instant::now();
    let result = queue.take(Some(started + Duration::from_millis(30)), &CancellationToken::new());
    assert!(matches!(result, Err(ExecutorError::Timeout)));
    assert!(started.elapsed() >= Duration::from_millis(30));
  }

  #[test]
  fn test_elapsed_deadline_still_returns_ready_index() {
    let queue = CompletionQueue::new();
    let (job, handle) = new_task(callable(|| ()));
    queue.watch(&handle, 3);
    job.run();
    let result = queue.take(Some(Instant::now() - Duration::from_millis(1)), &CancellationToken::new());
    assert_eq!(result.unwrap(), 3);
  }

  #[test]
  fn test_next_slice_is_bounded_by_deadline_and_interval() {
    let interrupt = CancellationToken::new();
    let now = Instant::now();
    let far = now + Duration::from_secs(3600);
    assert!(next_slice(Some(far), &interrupt).unwrap() < far);
    assert!(next_slice(None, &interrupt).unwrap() <= Instant::now() + INTERRUPT_CHECK_INTERVAL);
    assert!(matches!(next_slice(Some(now), &interrupt), Err(ExecutorError::Timeout)));

    interrupt.cancel();
    assert!(matches!(next_slice(Some(now), &interrupt), Err(ExecutorError::Interrupted)));
  }

  #[test]
  fn test_take_observes_interrupt() {
    let queue = CompletionQueue::new();
    let interrupt = CancellationToken::new();
    let canceller = {
      let interrupt = interrupt.clone();
      thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        interrupt.cancel();
      })
    };
    assert!(matches!(queue.take(None, &interrupt), Err(ExecutorError::Interrupted)));
    canceller.join().unwrap();
  }
}
