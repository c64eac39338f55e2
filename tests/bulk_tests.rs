use reusable_executor::{
  callable, fallible, is_interrupted, Callable, CancellationToken, ExecutorError, RejectionPolicy, ReusableExecutor,
  TaskState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,reusable_executor=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

// Sleeps in short slices so cancellation with interruption ends it early.
// Returns whether the full duration elapsed.
fn interruptible_sleep(duration: Duration) -> bool {
  let deadline = Instant::now() + duration;
  while Instant::now() < deadline {
    if is_interrupted() {
      return false;
    }
    thread::sleep(Duration::from_millis(5));
  }
  true
}

fn failing_task(message: &'static str) -> Callable<u32> {
  fallible(move || -> Result<u32, std::io::Error> { Err(std::io::Error::other(message)) })
}

#[test]
fn test_invoke_all_returns_handles_in_input_order() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_invoke_all_order").build().unwrap();
  let mut rng = rand::rng();
  let tasks: Vec<Callable<usize>> = (0..8)
    .map(|i| {
      let pause = Duration::from_millis(rng.random_range(0..10));
      callable(move || {
        thread::sleep(pause);
        i * 10
      })
    })
    .collect();

  let handles = executor.invoke_all(tasks).unwrap();
  assert!(handles.iter().all(|handle| handle.is_done()));
  let values: Vec<_> = handles.into_iter().map(|handle| handle.get().unwrap()).collect();
  assert_eq!(values, (0..8).map(|i| i * 10).collect::<Vec<_>>());
}

#[test]
fn test_invoke_all_keeps_individual_failures_on_handles() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_invoke_all_failures").build().unwrap();
  let tasks = vec![callable(|| 1u32), failing_task("second fails"), callable(|| 3u32)];

  let handles = executor.invoke_all(tasks).unwrap();
  let states: Vec<_> = handles.iter().map(|handle| handle.state()).collect();
  assert_eq!(states, vec![TaskState::Completed, TaskState::Failed, TaskState::Completed]);
  assert!(handles[1].failure().unwrap().to_string().contains("second fails"));
}

#[test]
fn test_invoke_all_empty_is_empty() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_invoke_all_empty").build().unwrap();
  let handles = executor.invoke_all(Vec::<Callable<u32>>::new()).unwrap();
  assert!(handles.is_empty());
}

#[test]
fn test_invoke_all_timeout_leaves_no_unfinished_handle() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_invoke_all_timeout").build().unwrap();
  let tasks: Vec<Callable<u32>> = (0..5)
    .map(|i| callable(move || if interruptible_sleep(Duration::from_millis(60)) { i } else { u32::MAX }))
    .collect();

  let started = Instant::now();
  let handles = executor.invoke_all_timeout(tasks, Duration::from_millis(100)).unwrap();
  assert!(started.elapsed() < Duration::from_secs(2));

  assert!(handles.iter().all(|handle| handle.is_done()));
  assert_eq!(handles[0].state(), TaskState::Completed);
  assert!(handles.iter().any(|handle| handle.is_cancelled()));
}

#[test]
fn test_invoke_all_zero_timeout_submits_nothing() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_invoke_all_zero").build().unwrap();
  let ran = Arc::new(AtomicBool::new(false));
  let tasks: Vec<Callable<()>> = (0..3)
    .map(|_| {
      let ran = ran.clone();
      callable(move || ran.store(true, Ordering::SeqCst))
    })
    .collect();

  let handles = executor.invoke_all_timeout(tasks, Duration::ZERO).unwrap();
  assert!(handles.iter().all(|handle| handle.is_cancelled()));
  executor.shutdown();
  assert!(executor.await_termination(Duration::from_secs(5)));
  assert!(!ran.load(Ordering::SeqCst));
  assert_eq!(executor.tasks_executed(), 0);
}

#[test]
fn test_bulk_calls_accept_unbounded_timeouts() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_bulk_max_timeout").build().unwrap();

  let handles = executor.invoke_all_timeout(vec![callable(|| 1u32), callable(|| 2u32)], Duration::MAX).unwrap();
  let values: Vec<_> = handles.into_iter().map(|handle| handle.get().unwrap()).collect();
  assert_eq!(values, vec![1, 2]);

  let handles = executor
    .invoke_all_interruptible(vec![callable(|| 3u32)], Some(Duration::MAX), &CancellationToken::new())
    .unwrap();
  assert_eq!(handles[0].state(), TaskState::Completed);

  assert_eq!(executor.invoke_any_timeout(vec![failing_task("nope"), callable(|| 4u32)], Duration::MAX).unwrap(), 4);
  let any = executor.invoke_any_interruptible(vec![callable(|| 5u32)], Some(Duration::MAX), &CancellationToken::new());
  assert_eq!(any.unwrap(), 5);
}

#[test]
fn test_invoke_all_rejected_after_shutdown() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_invoke_all_rejected").build().unwrap();
  executor.shutdown();
  let err = executor.invoke_all(vec![callable(|| 1u32), callable(|| 2u32)]).unwrap_err();
  assert!(err.is_rejected());
}

#[test]
fn test_invoke_all_interruptible_stops_waiting_and_cancels() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_invoke_all_interrupt").build().unwrap();
  let completed_naturally = Arc::new(AtomicBool::new(false));
  let flag = completed_naturally.clone();
  let tasks: Vec<Callable<()>> = vec![callable(move || {
    if interruptible_sleep(Duration::from_secs(5)) {
      flag.store(true, Ordering::SeqCst);
    }
  })];

  let interrupt = CancellationToken::new();
  let canceller = {
    let interrupt = interrupt.clone();
    thread::spawn(move || {
      thread::sleep(Duration::from_millis(40));
      interrupt.cancel();
    })
  };

  let result = executor.invoke_all_interruptible(tasks, None, &interrupt);
  assert!(matches!(result, Err(ExecutorError::Interrupted)));
  canceller.join().unwrap();

  executor.shutdown();
  assert!(executor.await_termination(Duration::from_secs(5)));
  assert!(!completed_naturally.load(Ordering::SeqCst));
}

#[test]
fn test_invoke_any_returns_first_success_and_cancels_rest() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_invoke_any_first").build().unwrap();
  let straggler_finished = Arc::new(AtomicBool::new(false));
  let flag = straggler_finished.clone();
  let tasks: Vec<Callable<u32>> = vec![
    failing_task("first fails"),
    callable(|| 2),
    callable(move || {
      if interruptible_sleep(Duration::from_secs(2)) {
        flag.store(true, Ordering::SeqCst);
      }
      3
    }),
  ];

  assert_eq!(executor.invoke_any(tasks).unwrap(), 2);
  executor.shutdown();
  assert!(executor.await_termination(Duration::from_secs(5)));
  assert!(!straggler_finished.load(Ordering::SeqCst));
}

#[test]
fn test_invoke_any_all_failing_reports_last_failure() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_invoke_any_all_fail").build().unwrap();
  let tasks = vec![failing_task("first"), failing_task("second"), failing_task("third")];

  match executor.invoke_any(tasks) {
    Err(ExecutorError::AllTasksFailed { last }) => assert!(last.to_string().contains("third")),
    other => panic!("Expected AllTasksFailed, got {:?}", other),
  }
}

#[test]
fn test_invoke_any_empty_task_set() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_invoke_any_empty").build().unwrap();
  let result = executor.invoke_any(Vec::<Callable<u32>>::new());
  assert!(matches!(result, Err(ExecutorError::EmptyTaskSet)));
}

#[test]
fn test_invoke_any_timeout_elapses() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_invoke_any_timeout").build().unwrap();
  let tasks: Vec<Callable<u32>> = vec![callable(|| {
    interruptible_sleep(Duration::from_secs(2));
    1
  })];

  let started = Instant::now();
  let result = executor.invoke_any_timeout(tasks, Duration::from_millis(40));
  assert!(matches!(result, Err(ExecutorError::Timeout)));
  assert!(started.elapsed() >= Duration::from_millis(40));
  assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_invoke_any_with_discarded_tasks_fails_instead_of_hanging() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder()
    .name("test_invoke_any_discard")
    .rejection_policy(RejectionPolicy::Discard)
    .build()
    .unwrap();
  executor.shutdown();

  match executor.invoke_any(vec![callable(|| 1u32), callable(|| 2u32)]) {
    Err(ExecutorError::AllTasksFailed { last }) => assert!(last.to_string().contains("cancelled")),
    other => panic!("Expected AllTasksFailed, got {:?}", other),
  }
}

#[test]
fn test_invoke_any_interruptible_observes_token() {
  setup_tracing_for_test();
  let executor = ReusableExecutor::builder().name("test_invoke_any_interrupt").build().unwrap();
  let interrupt = CancellationToken::new();
  interrupt.cancel();
  let tasks: Vec<Callable<u32>> = vec![callable(|| {
    interruptible_sleep(Duration::from_secs(2));
    1
  })];
  let result = executor.invoke_any_interruptible(tasks, None, &interrupt);
  assert!(matches!(result, Err(ExecutorError::Interrupted)));
}
