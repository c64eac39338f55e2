//! A single-worker, reusable thread executor with future handles, rejection
//! policies, transparent worker replacement and `invoke_all`/`invoke_any`.

mod builder;
mod bulk;
mod completion;
mod error;
mod executor;
mod handle;
mod queue;
mod rejection;
mod state;
mod task;
mod thread_factory;
mod worker;

pub use builder::ExecutorBuilder;
pub use error::{BoxError, ExecutorError, TaskFailure};
pub use executor::ReusableExecutor;
pub use handle::{TaskHandle, TaskState};
pub use queue::{BlockingQueue, TaskQueue};
pub use rejection::{RejectionCounter, RejectionHandler, RejectionPolicy};
pub use state::ExecutorState;
pub use task::{callable, fallible, with_result, Callable, Job, JobInfo};
pub use thread_factory::{IndexedThreadFactory, ThreadFactory};
pub use worker::{is_interrupted, ExecutionHooks, NoopHooks, WorkerView};

pub use tokio_util::sync::CancellationToken;
