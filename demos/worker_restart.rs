use reusable_executor::{ExecutionHooks, JobInfo, ReusableExecutor, TaskFailure, WorkerView};
use std::time::Duration;
use tracing::{info, warn};

struct LoggingHooks;

impl ExecutionHooks for LoggingHooks {
  fn before_execute(&self, worker: &WorkerView, job: &JobInfo) {
    info!("Worker {:?} (generation {}) starting job {}", worker.name(), worker.generation(), job.id);
  }

  fn after_execute(&self, job: &JobInfo, failure: Option<&TaskFailure>) {
    if let Some(failure) = failure {
      warn!("Job {} failed: {}", job.id, failure);
    }
  }
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Worker Restart Example ---");

  let executor = ReusableExecutor::builder()
    .name("restart_executor")
    .hooks(LoggingHooks)
    .build()
    .expect("Failed to start executor");

  info!("Initial worker: {:?}", executor.worker());

  // A panicking fire-and-forget job takes its worker thread down with it.
  executor
    .execute(|| panic!("This job is designed to panic!"))
    .expect("Failed to queue panicking job");

  let handle = executor
    .submit(|| "the executor keeps working".to_string())
    .expect("Failed to submit follow-up task");
  match handle.get() {
    Ok(message) => info!("Follow-up task: {}", message),
    Err(e) => info!("Follow-up task failed unexpectedly: {}", e),
  }
  info!("Replacement worker: {:?}", executor.worker());

  // A panic inside a submitted task is captured by its handle instead.
  let captured = executor.submit(|| -> u32 { panic!("captured by the handle") }).expect("Failed to submit");
  info!("Submitted task result: {:?}", captured.get());
  info!("Worker after captured panic: {:?}", executor.worker());

  executor.shutdown();
  executor.await_termination(Duration::from_secs(5));
  info!("{}", executor);
  info!("--- Worker Restart Example End ---");
}
