//! Submission and listing, independent of HTTP.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::db::PostingStore;
use crate::models::Posting;
use crate::queue::{Task, TaskQueue, TaskResult, TaskState};
use crate::types::{AppError, AppResult};

/// Shown on the index page when the store cannot be read.
pub const STORE_UNAVAILABLE_WARNING: &str = "An error occurred while fetching job postings.";

#[derive(Clone)]
pub struct Intake {
    store: Arc<dyn PostingStore>,
    queue: Arc<dyn TaskQueue>,
}

impl Intake {
    pub fn new(store: Arc<dyn PostingStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    /// Create a posting and enqueue exactly one task for it.
    ///
    /// Blank content is rejected before anything is written. If the broker is down the
    /// posting stays `new` and the error is returned to the caller.
    pub async fn submit(&self, content: &str) -> AppResult<i64> {
        if content.trim().is_empty() {
            return Err(AppError::Validation("Job posting cannot be empty".to_string()));
        }

        let id = self.store.create(content).await.map_err(|e| {
            error!(error = %e, "Error creating posting");
            e
        })?;

        let task = Task::new(id);
        // Written before the task is visible so a worker's `Running` cannot be overwritten.
        self.record(&task, TaskState::Pending, None).await;

        if let Err(e) = self.queue.enqueue(&task).await {
            error!(posting_id = id, task_id = %task.id, error = %e, "Error enqueueing posting");
            self.record(&task, TaskState::Failed, Some(e.to_string())).await;
            return Err(match e {
                AppError::Enqueue(_) => e,
                other => AppError::Enqueue(other.to_string()),
            });
        }

        info!(posting_id = id, task_id = %task.id, "Posting submitted");
        Ok(id)
    }

    async fn record(&self, task: &Task, state: TaskState, detail: Option<String>) {
        let result = TaskResult::new(task, state, detail);
        if let Err(e) = self.queue.record_result(&result).await {
            warn!(task_id = %task.id, error = %e, "Failed to record task result");
        }
    }

    /// Current postings, or an empty list plus a warning when the store is unavailable.
    pub async fn index(&self) -> (Vec<Posting>, Option<String>) {
        match self.store.list_all().await {
            Ok(postings) => (postings, None),
            Err(e) => {
                error!(error = %e, "Error fetching postings");
                (Vec::new(), Some(STORE_UNAVAILABLE_WARNING.to_string()))
            }
        }
    }
}
