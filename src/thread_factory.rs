use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::thread::{self, JoinHandle};

/// Creates and starts the thread a worker runs on.
pub trait ThreadFactory: Send + Sync {
  fn new_thread(&self, work: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>>;
}

impl<F> ThreadFactory for F
where
  F: Fn(Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> + Send + Sync,
{
  fn new_thread(&self, work: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> {
    self(work)
  }
}

/// Names threads from a pattern such as `"task-thread-{}"`, replacing `{}` with
/// an index that increments per created thread. A pattern without `{}` gets
/// `-{index}` appended.
pub struct IndexedThreadFactory {
  pattern: String,
  index: AtomicUsize,
}

impl IndexedThreadFactory {
  pub fn new(pattern: impl Into<String>, start_index: usize) -> Self {
    Self {
      pattern: pattern.into(),
      index: AtomicUsize::new(start_index),
    }
  }

  pub fn pattern(&self) -> &str {
    &self.pattern
  }

  /// The index the next created thread will receive.
  pub fn next_index(&self) -> usize {
    self.index.load(AtomicOrdering::SeqCst)
  }

  fn thread_name(&self, index: usize) -> String {
    if self.pattern.contains("{}") {
      self.pattern.replacen("{}", &index.to_string(), 1)
    } else {
      format!("{}-{}", self.pattern, index)
    }
  }
}

impl ThreadFactory for IndexedThreadFactory {
  fn new_thread(&self, work: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> {
    let index = self.index.fetch_add(1, AtomicOrdering::SeqCst);
    thread::Builder::new().name(self.thread_name(index)).spawn(work)
  }
}

impl fmt::Debug for IndexedThreadFactory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IndexedThreadFactory")
      .field("pattern", &self.pattern)
      .field("next_index", &self.next_index())
      .finish()
  }
}
