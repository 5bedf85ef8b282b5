//! In-process broker.
//!
//! Ready tasks live in a `VecDeque`; delayed tasks sit in a sleeping tokio task until
//! they are due. Results expire after [`RESULT_TTL`] like on the Redis backend. Nothing
//! survives a restart, so this backend suits single-process development runs and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use super::{Task, TaskQueue, TaskResult, RESULT_TTL};
use crate::types::AppResult;

struct StoredResult {
    result: TaskResult,
    recorded_at: Instant,
}

/// Latest result per task plus insertion order, so expired entries are dropped from
/// the front without scanning the whole map.
#[derive(Default)]
struct Results {
    entries: HashMap<Uuid, StoredResult>,
    order: VecDeque<(Instant, Uuid)>,
}

impl Results {
    fn insert(&mut self, result: TaskResult, now: Instant, ttl: Duration) {
        self.prune(now, ttl);
        self.order.push_back((now, result.task_id));
        self.entries.insert(
            result.task_id,
            StoredResult {
                result,
                recorded_at: now,
            },
        );
    }

    fn prune(&mut self, now: Instant, ttl: Duration) {
        while let Some(&(recorded_at, task_id)) = self.order.front() {
            if now.duration_since(recorded_at) < ttl {
                break;
            }
            self.order.pop_front();
            // A newer record for the same task has its own place in `order`.
            if self
                .entries
                .get(&task_id)
                .is_some_and(|stored| stored.recorded_at == recorded_at)
            {
                self.entries.remove(&task_id);
            }
        }
    }

    fn get(&self, task_id: &Uuid, now: Instant, ttl: Duration) -> Option<&TaskResult> {
        self.entries
            .get(task_id)
            .filter(|stored| now.duration_since(stored.recorded_at) < ttl)
            .map(|stored| &stored.result)
    }
}

struct Inner {
    ready: Mutex<VecDeque<Task>>,
    results: Mutex<Results>,
    notify: Notify,
}

impl Inner {
    async fn push(&self, task: Task) {
        self.ready.lock().await.push_back(task);
        self.notify.notify_one();
    }
}

#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
    poll_interval: Duration,
    result_ttl: Duration,
}

impl MemoryQueue {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                ready: Mutex::new(VecDeque::new()),
                results: Mutex::new(Results::default()),
                notify: Notify::new(),
            }),
            poll_interval,
            result_ttl: RESULT_TTL,
        }
    }

    /// Number of tasks ready to run.
    pub async fn ready_len(&self) -> usize {
        self.inner.ready.lock().await.len()
    }

    pub async fn result(&self, task_id: Uuid) -> Option<TaskResult> {
        self.inner
            .results
            .lock()
            .await
            .get(&task_id, Instant::now(), self.result_ttl)
            .cloned()
    }

    /// Number of task results currently retained.
    pub async fn results_len(&self) -> usize {
        self.inner.results.lock().await.entries.len()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, task: &Task) -> AppResult<()> {
        self.inner.push(task.clone()).await;
        Ok(())
    }

    async fn schedule(&self, task: &Task, delay: Duration) -> AppResult<()> {
        let inner = self.inner.clone();
        let task = task.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.push(task).await;
        });
        Ok(())
    }

    async fn dequeue(&self) -> AppResult<Option<Task>> {
        if let Some(task) = self.inner.ready.lock().await.pop_front() {
            return Ok(Some(task));
        }

        // `notify_one` leaves a permit behind, so a push racing this wait is not missed.
        let _ = tokio::time::timeout(self.poll_interval, self.inner.notify.notified()).await;

        Ok(self.inner.ready.lock().await.pop_front())
    }

    async fn record_result(&self, result: &TaskResult) -> AppResult<()> {
        self.inner
            .results
            .lock()
            .await
            .insert(result.clone(), Instant::now(), self.result_ttl);
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}
