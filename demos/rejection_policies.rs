use reusable_executor::{RejectionCounter, RejectionPolicy, ReusableExecutor};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn run_with(policy: RejectionPolicy, counter: Option<&RejectionCounter>) {
  let label = format!("{:?}", policy);
  info!("--- Policy: {} ---", label);
  let executor = ReusableExecutor::builder()
    .name(format!("policy_{}", label.to_lowercase()))
    .queue_capacity(1)
    .rejection_policy(policy)
    .build()
    .expect("Failed to start executor");

  // Keep the worker busy so the one-slot queue fills up.
  let (release_tx, release_rx) = mpsc::channel::<()>();
  let (started_tx, started_rx) = mpsc::channel();
  executor
    .execute(move || {
      started_tx.send(()).ok();
      let _ = release_rx.recv();
    })
    .expect("Blocking task rejected");
  started_rx.recv().ok();

  // Task 0 takes the queue slot; tasks 1 and 2 meet the policy.
  let submissions: Vec<_> = (0..3)
    .map(|i| executor.submit(move || format!("task {} ran on {:?}", i, std::thread::current().name())))
    .collect();
  release_tx.send(()).ok();

  for (i, submission) in submissions.into_iter().enumerate() {
    match submission {
      Ok(handle) => match handle.get() {
        Ok(message) => info!("{}", message),
        Err(e) => info!("task {} did not run: {}", i, e),
      },
      Err(e) => info!("task {} rejected: {}", i, e),
    }
  }

  if let Some(counter) = counter {
    info!("Rejections counted: {}, last: {:?}", counter.count(), counter.last_rejected());
  }
  executor.shutdown();
  executor.await_termination(Duration::from_secs(5));
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Rejection Policies Example ---");

  run_with(RejectionPolicy::Abort, None);
  run_with(RejectionPolicy::CallerRuns, None);
  run_with(RejectionPolicy::Discard, None);

  let counter = Arc::new(RejectionCounter::new());
  run_with(RejectionPolicy::counting(counter.clone()), Some(&counter));

  info!("--- Rejection Policies Example End ---");
}
