use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One unit of queued work. The id stays the same across retries; `attempt` counts
/// executions starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub posting_id: i64,
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    pub fn new(posting_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            posting_id,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            id: self.id,
            posting_id: self.posting_id,
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Retrying,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

/// What the result backend keeps about a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub posting_id: i64,
    pub state: TaskState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn new(task: &Task, state: TaskState, detail: Option<String>) -> Self {
        Self {
            task_id: task.id,
            posting_id: task.posting_id,
            state,
            attempts: task.attempt,
            detail,
            updated_at: Utc::now(),
        }
    }
}
