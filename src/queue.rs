use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

/// A blocking FIFO hand-off between many producers and one active consumer.
///
/// `offer` never blocks: a full queue hands the item back. `take` blocks until
/// an item is available, returning queued items before honouring `stop`.
pub trait BlockingQueue<T>: Send + Sync {
  /// Enqueues `item`, or returns it when the queue is at capacity.
  fn offer(&self, item: T) -> Result<(), T>;

  /// Blocks until an item is available. Returns `None` once `stop` is
  /// cancelled and the queue is empty.
  fn take(&self, stop: &CancellationToken) -> Option<T>;

  /// Removes and returns every queued item, oldest first.
  fn drain(&self) -> Vec<T>;

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// `None` for an unbounded queue.
  fn capacity(&self) -> Option<usize>;

  /// Wakes blocked consumers so they re-check their stop token.
  fn wake_consumers(&self);
}

/// The default queue: a `VecDeque` behind a mutex, with a condition variable
/// for blocked consumers. Optionally bounded.
pub struct TaskQueue<T> {
  items: Mutex<VecDeque<T>>,
  not_empty: Condvar,
  capacity: Option<usize>,
}

impl<T> TaskQueue<T> {
  pub fn unbounded() -> Self {
    Self {
      items: Mutex::new(VecDeque::new()),
      not_empty: Condvar::new(),
      capacity: None,
    }
  }

  /// A queue holding at most `capacity` items (at least one).
  pub fn bounded(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      items: Mutex::new(VecDeque::with_capacity(capacity)),
      not_empty: Condvar::new(),
      capacity: Some(capacity),
    }
  }
}

impl<T> Default for TaskQueue<T> {
  fn default() -> Self {
    Self::unbounded()
  }
}

impl<T> fmt::Debug for TaskQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskQueue")
      .field("len", &self.items.lock().len())
      .field("capacity", &self.capacity)
      .finish()
  }
}

impl<T: Send> BlockingQueue<T> for TaskQueue<T> {
  fn offer(&self, item: T) -> Result<(), T> {
    let mut items = self.items.lock();
    if let Some(capacity) = self.capacity {
      if items.len() >= capacity {
        return Err(item);
      }
    }
    items.push_back(item);
    drop(items);
    self.not_empty.notify_one();
    Ok(())
  }

  fn take(&self, stop: &CancellationToken) -> Option<T> {
    let mut items = self.items.lock();
    loop {
      if let Some(item) = items.pop_front() {
        return Some(item);
      }
      // Checked under the lock; `wake_consumers` takes the same lock before
      // notifying, so a cancellation between check and wait is not missed.
      if stop.is_cancelled() {
        return None;
      }
      self.not_empty.wait(&mut items);
    }
  }

  fn drain(&self) -> Vec<T> {
    self.items.lock().drain(..).collect()
  }

  fn len(&self) -> usize {
    self.items.lock().len()
  }

  fn capacity(&self) -> Option<usize> {
    self.capacity
  }

  fn wake_consumers(&self) {
    let _items = self.items.lock();
    self.not_empty.notify_all();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::thread;
  use std::time::Duration;

  #[test]
  fn test_queue_offer_take_fifo() {
    let queue = TaskQueue::unbounded();
    let stop = CancellationToken::new();
    for i in 0..3 {
      queue.offer(i).unwrap();
    }
    assert_eq!(queue.len(), 3);
    assert_eq!(queue.take(&stop), Some(0));
    assert_eq!(queue.take(&stop), Some(1));
    assert_eq!(queue.take(&stop), Some(2));
    assert!(queue.is_empty());
  }

  #[test]
  fn test_bounded_queue_rejects_when_full() {
    let queue = TaskQueue::bounded(1);
    assert_eq!(queue.capacity(), Some(1));
    queue.offer("first").unwrap();
    assert_eq!(queue.offer("second"), Err("second"));
    assert_eq!(queue.len(), 1);

    let stop = CancellationToken::new();
    assert_eq!(queue.take(&stop), Some("first"));
    queue.offer("third").unwrap();
  }

  #[test]
  fn test_zero_capacity_is_clamped_to_one() {
    let queue = TaskQueue::bounded(0);
    assert_eq!(queue.capacity(), Some(1));
    queue.offer(1).unwrap();
  }

  #[test]
  fn test_take_returns_queued_items_before_stop() {
    let queue = TaskQueue::unbounded();
    let stop = CancellationToken::new();
    queue.offer(1).unwrap();
    stop.cancel();
    assert_eq!(queue.take(&stop), Some(1));
    assert_eq!(queue.take(&stop), None);
  }

  #[test]
  fn test_blocked_take_released_by_stop() {
    let queue = Arc::new(TaskQueue::<u32>::unbounded());
    let stop = CancellationToken::new();

    let consumer = {
      let queue = queue.clone();
      let stop = stop.clone();
      thread::spawn(move || queue.take(&stop))
    };

    thread::sleep(Duration::from_millis(50));
    stop.cancel();
    queue.wake_consumers();
    assert_eq!(consumer.join().unwrap(), None);
  }

  #[test]
  fn test_drain_empties_queue_in_order() {
    let queue = TaskQueue::bounded(4);
    for i in 0..4 {
      queue.offer(i).unwrap();
    }
    assert_eq!(queue.drain(), vec![0, 1, 2, 3]);
    assert!(queue.is_empty());
    assert!(queue.drain().is_empty());
  }

  #[test]
  fn test_queue_concurrent_producers_single_consumer() {
    let queue = Arc::new(TaskQueue::<u64>::unbounded());
    let stop = CancellationToken::new();
    let num_producers = 4u64;
    let per_producer = 50u64;
    let received_count = Arc::new(AtomicUsize::new(0));

    let consumer = {
      let queue = queue.clone();
      let stop = stop.clone();
      let received_count = received_count.clone();
      thread::spawn(move || {
        while queue.take(&stop).is_some() {
          received_count.fetch_add(1, Ordering::SeqCst);
        }
      })
    };

    let producers: Vec<_> = (0..num_producers)
      .map(|p| {
        let queue = queue.clone();
        thread::spawn(move || {
          for i in 0..per_producer {
            queue.offer(p * per_producer + i).unwrap();
          }
        })
      })
      .collect();
    for producer in producers {
      producer.join().unwrap();
    }

    stop.cancel();
    queue.wake_consumers();
    consumer.join().unwrap();
    assert_eq!(received_count.load(Ordering::SeqCst), (num_producers * per_producer) as usize);
  }
}
