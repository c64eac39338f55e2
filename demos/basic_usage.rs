use reusable_executor::{callable, Callable, ReusableExecutor, TaskHandle};
use std::thread;
use std::time::Duration;
use tracing::info;

fn my_task_fn(id: usize, delay_ms: u64) -> String {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  thread::sleep(Duration::from_millis(delay_ms));
  let result = format!("Task {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  result
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let executor = ReusableExecutor::builder()
    .name("basic_executor")
    .queue_capacity(10)
    .build()
    .expect("Failed to start executor");

  let mut handles: Vec<TaskHandle<String>> = Vec::new();

  for i in 0..5 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 100 + (i as u64 % 3 * 50);
    match executor.submit(move || my_task_fn(i, sleep_duration)) {
      Ok(handle) => {
        info!("Submitted task {} with handle id {}", i, handle.id());
        handles.push(handle);
      }
      Err(e) => tracing::error!("Failed to submit task {}: {:?}", i, e),
    }
  }

  info!("All tasks submitted. Waiting for results...");
  for handle in handles {
    let task_id = handle.id();
    match handle.get() {
      Ok(result) => info!("Result for task {}: {}", task_id, result),
      Err(e) => info!("Error for task {}: {:?}", task_id, e),
    }
  }

  info!("invoke_any: racing three lookups, first success wins.");
  let lookups: Vec<Callable<&'static str>> = vec![
    Box::new(|| Err("primary replica unavailable".into())),
    callable(|| "answer from secondary replica"),
    callable(|| "answer from tertiary replica"),
  ];
  match executor.invoke_any(lookups) {
    Ok(answer) => info!("invoke_any returned: {}", answer),
    Err(e) => info!("invoke_any failed: {}", e),
  }

  info!("Executor status: {}", executor);
  executor.shutdown();
  if executor.await_termination(Duration::from_secs(5)) {
    info!("Executor terminated after running {} tasks.", executor.tasks_executed());
  }
  info!("--- Basic Usage Example End ---");
}
