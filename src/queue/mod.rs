//! Task Queue & Worker Pool
//!
//! A task references one posting by id. The web front door only enqueues; workers
//! pull tasks, run the extraction and drive the posting to a terminal status.
//!
//! ```text
//! enqueue ──► ready ──► dequeue ──► Worker::handle
//!               ▲                        │
//!               │   schedule(delay)      │ retryable failure,
//!             delayed ◄──────────────────┘ retries left
//! ```
//!
//! Two brokers implement [`TaskQueue`]: [`RedisQueue`] for deployments with a separate
//! worker process and [`MemoryQueue`] for single-process runs and tests.

pub mod broker;
pub mod jobs;
pub mod memory;
pub mod retry;
pub mod workers;

use std::time::Duration;

use async_trait::async_trait;

use crate::types::AppResult;

pub use broker::RedisQueue;
pub use jobs::{Task, TaskResult, TaskState};
pub use memory::MemoryQueue;
pub use retry::RetryPolicy;
pub use workers::{TaskOutcome, Worker, WorkerContext, WorkerPool};

/// How long a broker keeps the latest [`TaskResult`] of a task.
pub const RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Make `task` available to workers now. Fails with `AppError::Enqueue` when the
    /// broker cannot be reached; the task is never silently dropped.
    async fn enqueue(&self, task: &Task) -> AppResult<()>;

    /// Make `task` available to workers once `delay` has passed.
    async fn schedule(&self, task: &Task, delay: Duration) -> AppResult<()>;

    /// Take the next ready task, waiting at most one poll interval for one to appear.
    async fn dequeue(&self) -> AppResult<Option<Task>>;

    /// Store the latest state of a task in the result backend.
    async fn record_result(&self, result: &TaskResult) -> AppResult<()>;

    async fn ping(&self) -> AppResult<()>;
}
