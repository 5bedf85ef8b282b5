//! Worker and worker pool.
//!
//! Each dequeued task runs through [`Worker::handle`]:
//!
//! ```text
//! load posting ──► missing? ──► log, done (no-op)
//!      │
//!      ▼
//! extract fields ──► ok ──► mark processed ──► publish job_processed
//!      │
//!      └─ error ──► mark failed (best effort) ──► retries left? schedule : give up
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{RetryPolicy, Task, TaskQueue, TaskResult, TaskState};
use crate::db::PostingStore;
use crate::extraction::Extractor;
use crate::models::{JobProcessedPayload, JOB_PROCESSED_EVENT};
use crate::notify::Notifier;
use crate::types::AppError;

/// Everything a worker touches, handed in explicitly.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn PostingStore>,
    pub extractor: Arc<dyn Extractor>,
    pub notifier: Arc<dyn Notifier>,
    pub queue: Arc<dyn TaskQueue>,
    pub retry: RetryPolicy,
}

/// Result of one execution of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded,
    /// The posting no longer exists; nothing was written.
    Skipped,
    Retry { delay: Duration, error: String },
    Exhausted { error: String },
}

pub struct Worker {
    ctx: WorkerContext,
}

impl Worker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Run one attempt of `task` against the store, extractor and notifier.
    pub async fn process(&self, task: &Task) -> TaskOutcome {
        let posting_id = task.posting_id;
        debug!(task_id = %task.id, posting_id, attempt = task.attempt, "Processing posting");

        let posting = match self.ctx.store.get(posting_id).await {
            Ok(Some(posting)) => posting,
            Ok(None) => {
                error!(task_id = %task.id, posting_id, "Posting not found, dropping task");
                return TaskOutcome::Skipped;
            }
            Err(e) => return self.fail(task, e).await,
        };

        let fields = match self.ctx.extractor.extract(&posting.content).await {
            Ok(fields) => fields,
            Err(e) => return self.fail(task, e).await,
        };
        debug!(posting_id, fields = ?fields, "Extracted fields");

        if let Err(e) = self.ctx.store.mark_processed(posting_id, &fields).await {
            return self.fail(task, e).await;
        }
        info!(posting_id, attempt = task.attempt, "Posting marked as processed");

        let payload = JobProcessedPayload {
            id: posting_id,
            fields,
        };
        match serde_json::to_value(&payload) {
            Ok(value) => {
                self.ctx.notifier.publish(JOB_PROCESSED_EVENT, value).await;
                debug!(posting_id, event = JOB_PROCESSED_EVENT, "Notification emitted");
            }
            Err(e) => error!(posting_id, error = %e, "Failed to encode notification payload"),
        }

        TaskOutcome::Succeeded
    }

    async fn fail(&self, task: &Task, err: AppError) -> TaskOutcome {
        let posting_id = task.posting_id;
        error!(
            task_id = %task.id,
            posting_id,
            attempt = task.attempt,
            error = %err,
            "Error processing posting"
        );

        // Secondary write; its failure must not replace the original error.
        match self.ctx.store.mark_failed(posting_id).await {
            Ok(true) => info!(posting_id, "Posting marked as failed"),
            Ok(false) => debug!(posting_id, "Posting status left unchanged"),
            Err(inner) => error!(
                posting_id,
                error = %inner,
                original_error = %err,
                "Error marking posting as failed"
            ),
        }

        let error = err.to_string();
        if err.is_retryable() && self.ctx.retry.should_retry(task.attempt) {
            TaskOutcome::Retry {
                delay: self.ctx.retry.delay,
                error,
            }
        } else {
            TaskOutcome::Exhausted { error }
        }
    }

    /// Run `task` and apply the outcome: record its state in the result backend and
    /// schedule the retry if one is due.
    pub async fn handle(&self, task: Task) -> TaskState {
        self.record(&task, TaskState::Running, None).await;

        let outcome = self.process(&task).await;

        let (state, detail) = match outcome {
            TaskOutcome::Succeeded => (TaskState::Succeeded, None),
            TaskOutcome::Skipped => (TaskState::Succeeded, Some("posting not found".to_string())),
            TaskOutcome::Retry { delay, error } => {
                // Recorded before scheduling so the next attempt's `Running` always lands last.
                self.record(&task, TaskState::Retrying, Some(error.clone())).await;

                let next = task.next_attempt();
                match self.ctx.queue.schedule(&next, delay).await {
                    Ok(()) => {
                        info!(
                            task_id = %task.id,
                            posting_id = task.posting_id,
                            next_attempt = next.attempt,
                            delay_secs = delay.as_secs(),
                            "Retry scheduled"
                        );
                        return TaskState::Retrying;
                    }
                    Err(e) => {
                        error!(
                            task_id = %task.id,
                            posting_id = task.posting_id,
                            error = %e,
                            "Could not schedule retry, giving up"
                        );
                        (TaskState::Failed, Some(error))
                    }
                }
            }
            TaskOutcome::Exhausted { error } => {
                warn!(
                    task_id = %task.id,
                    posting_id = task.posting_id,
                    attempts = task.attempt,
                    "Task failed permanently"
                );
                (TaskState::Failed, Some(error))
            }
        };

        self.record(&task, state, detail).await;
        state
    }

    async fn record(&self, task: &Task, state: TaskState, detail: Option<String>) {
        let result = TaskResult::new(task, state, detail);
        if let Err(e) = self.ctx.queue.record_result(&result).await {
            warn!(task_id = %task.id, state = ?state, error = %e, "Failed to record task result");
        }
    }
}

/// Pulls tasks from the queue and runs up to `concurrency` of them at once.
pub struct WorkerPool {
    worker: Arc<Worker>,
    queue: Arc<dyn TaskQueue>,
    concurrency: usize,
    error_backoff: Duration,
}

impl WorkerPool {
    pub fn new(ctx: WorkerContext, concurrency: usize) -> Self {
        Self {
            queue: ctx.queue.clone(),
            worker: Arc::new(Worker::new(ctx)),
            concurrency: concurrency.max(1),
            error_backoff: Duration::from_secs(1),
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped), then wait for
    /// in-flight tasks to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(concurrency = self.concurrency, "Worker pool started");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            match self.queue.dequeue().await {
                Ok(Some(task)) => {
                    let worker = self.worker.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        worker.handle(task).await
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Failed to dequeue task");
                    tokio::time::sleep(self.error_backoff).await;
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Worker task aborted");
                }
            }
        }

        info!(in_flight = in_flight.len(), "Worker pool draining");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task aborted");
            }
        }
        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::Intake;
    use crate::models::{JobFields, Posting, PostingStatus};
    use crate::notify::Notification;
    use crate::queue::MemoryQueue;
    use crate::types::AppResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        rows: Mutex<HashMap<i64, Posting>>,
        next_id: AtomicUsize,
        fail_reads: AtomicBool,
        fail_failed_writes: AtomicBool,
    }

    #[async_trait]
    impl PostingStore for FakeStore {
        async fn create(&self, content: &str) -> AppResult<i64> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            self.rows.lock().unwrap().insert(
                id,
                Posting {
                    id,
                    content: content.to_string(),
                    status: PostingStatus::New,
                    fields: None,
                },
            );
            Ok(id)
        }

        async fn get(&self, id: i64) -> AppResult<Option<Posting>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(AppError::Store(sqlx::Error::PoolTimedOut));
            }
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }

        async fn list_all(&self) -> AppResult<Vec<Posting>> {
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }

        async fn mark_processed(&self, id: i64, fields: &JobFields) -> AppResult<()> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("posting {}", id)))?;
            row.status = PostingStatus::Processed;
            row.fields = Some(fields.clone());
            Ok(())
        }

        async fn mark_failed(&self, id: i64) -> AppResult<bool> {
            if self.fail_failed_writes.load(Ordering::SeqCst) {
                return Err(AppError::Store(sqlx::Error::PoolTimedOut));
            }
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(&id) {
                Some(row) if row.status != PostingStatus::Processed => {
                    row.status = PostingStatus::Failed;
                    row.fields = None;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn ping(&self) -> AppResult<()> {
            Ok(())
        }
    }

    /// Fails the first `failures` calls with a timeout, then answers with `fields`.
    struct FlakyExtractor {
        failures: usize,
        calls: AtomicUsize,
        fields: JobFields,
    }

    impl FlakyExtractor {
        fn always_failing() -> Self {
            Self::failing_times(usize::MAX)
        }

        fn failing_times(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                fields: acme_fields(),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Extractor for FlakyExtractor {
        async fn extract(&self, _text: &str) -> AppResult<JobFields> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(AppError::Upstream("request timed out".to_string()))
            } else {
                Ok(self.fields.clone())
            }
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn publish(&self, event: &str, payload: serde_json::Value) {
            self.events.lock().unwrap().push(Notification {
                event: event.to_string(),
                data: payload,
            });
        }
    }

    fn acme_fields() -> JobFields {
        serde_json::from_value(json!({
            "Job Title": "Engineer",
            "Company Name": "Acme",
            "Location": "NYC",
            "Salary": "$100k",
            "Job Description": ""
        }))
        .unwrap()
    }

    struct Harness {
        store: Arc<FakeStore>,
        extractor: Arc<FlakyExtractor>,
        notifier: Arc<RecordingNotifier>,
        queue: Arc<MemoryQueue>,
    }

    impl Harness {
        fn new(extractor: FlakyExtractor) -> Self {
            Self {
                store: Arc::new(FakeStore::default()),
                extractor: Arc::new(extractor),
                notifier: Arc::new(RecordingNotifier::default()),
                queue: Arc::new(MemoryQueue::new(Duration::from_millis(100))),
            }
        }

        fn context(&self) -> WorkerContext {
            WorkerContext {
                store: self.store.clone(),
                extractor: self.extractor.clone(),
                notifier: self.notifier.clone(),
                queue: self.queue.clone(),
                retry: RetryPolicy::default(),
            }
        }

        fn worker(&self) -> Worker {
            Worker::new(self.context())
        }

        async fn posting(&self, id: i64) -> Posting {
            self.store.get(id).await.unwrap().unwrap()
        }

        fn events(&self) -> Vec<Notification> {
            self.notifier.events.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_success_marks_processed_and_notifies_once() {
        let harness = Harness::new(FlakyExtractor::failing_times(0));
        let id = harness.store.create("Engineer at Acme, NYC, $100k").await.unwrap();

        let outcome = harness.worker().process(&Task::new(id)).await;
        assert_eq!(outcome, TaskOutcome::Succeeded);

        let posting = harness.posting(id).await;
        assert_eq!(posting.status, PostingStatus::Processed);
        assert_eq!(posting.fields, Some(acme_fields()));

        let events = harness.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "job_processed");
        assert_eq!(
            events[0].data,
            json!({
                "id": id,
                "fields": {
                    "Job Title": "Engineer",
                    "Company Name": "Acme",
                    "Location": "NYC",
                    "Salary": "$100k",
                    "Job Description": ""
                }
            })
        );
    }

    #[tokio::test]
    async fn test_missing_posting_is_a_noop() {
        let harness = Harness::new(FlakyExtractor::failing_times(0));

        let state = harness.worker().handle(Task::new(404)).await;

        assert_eq!(state, TaskState::Succeeded);
        assert_eq!(harness.extractor.calls(), 0);
        assert!(harness.events().is_empty());
        assert!(harness.store.list_all().await.unwrap().is_empty());
        assert_eq!(harness.queue.ready_len().await, 0);
    }

    #[tokio::test]
    async fn test_failure_marks_failed_and_requests_retry() {
        let harness = Harness::new(FlakyExtractor::always_failing());
        let id = harness.store.create("x").await.unwrap();

        let outcome = harness.worker().process(&Task::new(id)).await;

        assert!(matches!(
            outcome,
            TaskOutcome::Retry { delay, .. } if delay == Duration::from_secs(60)
        ));
        let posting = harness.posting(id).await;
        assert_eq!(posting.status, PostingStatus::Failed);
        assert!(posting.fields.is_none());
        assert!(harness.events().is_empty());
    }

    #[tokio::test]
    async fn test_last_attempt_failure_is_exhausted() {
        let harness = Harness::new(FlakyExtractor::always_failing());
        let id = harness.store.create("x").await.unwrap();

        let mut task = Task::new(id);
        task.attempt = 4;

        let outcome = harness.worker().process(&task).await;
        assert!(matches!(outcome, TaskOutcome::Exhausted { .. }));
    }

    #[tokio::test]
    async fn test_failed_status_write_does_not_mask_original_error() {
        let harness = Harness::new(FlakyExtractor::always_failing());
        let id = harness.store.create("x").await.unwrap();
        harness.store.fail_failed_writes.store(true, Ordering::SeqCst);

        let outcome = harness.worker().process(&Task::new(id)).await;

        match outcome {
            TaskOutcome::Retry { error, .. } => assert!(error.contains("timed out")),
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_store_outage_is_retried() {
        let harness = Harness::new(FlakyExtractor::failing_times(0));
        let id = harness.store.create("x").await.unwrap();
        harness.store.fail_reads.store(true, Ordering::SeqCst);

        let outcome = harness.worker().process(&Task::new(id)).await;

        assert!(matches!(outcome, TaskOutcome::Retry { .. }));
        assert_eq!(harness.extractor.calls(), 0);
    }

    #[tokio::test]
    async fn test_handle_records_retrying_state() {
        let harness = Harness::new(FlakyExtractor::always_failing());
        let id = harness.store.create("x").await.unwrap();
        let task = Task::new(id);

        let state = harness.worker().handle(task.clone()).await;

        assert_eq!(state, TaskState::Retrying);
        let result = harness.queue.result(task.id).await.unwrap();
        assert_eq!(result.state, TaskState::Retrying);
        assert_eq!(result.attempts, 1);
    }

    /// Memory broker that also remembers every state recorded, in order.
    #[derive(Default)]
    struct HistoryQueue {
        inner: MemoryQueue,
        states: Mutex<Vec<TaskState>>,
    }

    #[async_trait]
    impl TaskQueue for HistoryQueue {
        async fn enqueue(&self, task: &Task) -> AppResult<()> {
            self.inner.enqueue(task).await
        }
        async fn schedule(&self, task: &Task, delay: Duration) -> AppResult<()> {
            self.inner.schedule(task, delay).await
        }
        async fn dequeue(&self) -> AppResult<Option<Task>> {
            self.inner.dequeue().await
        }
        async fn record_result(&self, result: &TaskResult) -> AppResult<()> {
            self.states.lock().unwrap().push(result.state);
            self.inner.record_result(result).await
        }
        async fn ping(&self) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_task_states_follow_lifecycle() {
        let harness = Harness::new(FlakyExtractor::failing_times(1));
        let history = Arc::new(HistoryQueue::default());

        let intake = Intake::new(harness.store.clone(), history.clone());
        let id = intake.submit("Engineer at Acme, NYC, $100k").await.unwrap();

        let task = history.dequeue().await.unwrap().unwrap();
        assert_eq!(task.posting_id, id);
        assert_eq!(
            history.inner.result(task.id).await.unwrap().state,
            TaskState::Pending
        );

        let mut ctx = harness.context();
        ctx.queue = history.clone();
        ctx.retry = RetryPolicy::new(3, Duration::ZERO);
        let worker = Worker::new(ctx);

        assert_eq!(worker.handle(task).await, TaskState::Retrying);
        let retry = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(task) = history.dequeue().await.unwrap() {
                    return task;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(retry.attempt, 2);
        assert_eq!(worker.handle(retry.clone()).await, TaskState::Succeeded);

        assert_eq!(
            *history.states.lock().unwrap(),
            vec![
                TaskState::Pending,
                TaskState::Running,
                TaskState::Retrying,
                TaskState::Running,
                TaskState::Succeeded,
            ]
        );
        let result = history.inner.result(retry.id).await.unwrap();
        assert_eq!(result.state, TaskState::Succeeded);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_running_recorded_before_processing() {
        let harness = Harness::new(FlakyExtractor::failing_times(0));
        let history = Arc::new(HistoryQueue::default());
        let mut ctx = harness.context();
        ctx.queue = history.clone();

        let state = Worker::new(ctx).handle(Task::new(404)).await;

        assert_eq!(state, TaskState::Succeeded);
        assert_eq!(
            *history.states.lock().unwrap(),
            vec![TaskState::Running, TaskState::Succeeded]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_extraction_gives_up_after_retries() {
        let harness = Harness::new(FlakyExtractor::always_failing());
        let id = harness.store.create("Engineer at Acme, NYC, $100k").await.unwrap();
        let task = Task::new(id);
        harness.queue.enqueue(&task).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = WorkerPool::new(harness.context(), 2);
        let running = tokio::spawn(pool.run(shutdown_rx));

        let start = tokio::time::Instant::now();
        loop {
            if let Some(result) = harness.queue.result(task.id).await {
                if result.state.is_terminal() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let elapsed = start.elapsed();

        // Let the pool idle through several more retry windows.
        tokio::time::sleep(Duration::from_secs(300)).await;
        shutdown_tx.send(true).unwrap();
        running.await.unwrap();

        let result = harness.queue.result(task.id).await.unwrap();
        assert_eq!(result.state, TaskState::Failed);
        assert_eq!(result.attempts, 4);
        assert_eq!(harness.extractor.calls(), 4);
        assert!(elapsed >= Duration::from_secs(180));
        assert!(elapsed < Duration::from_secs(240));

        assert_eq!(harness.posting(id).await.status, PostingStatus::Failed);
        assert!(harness.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failure() {
        let harness = Harness::new(FlakyExtractor::failing_times(1));
        let id = harness.store.create("Engineer at Acme, NYC, $100k").await.unwrap();
        let task = Task::new(id);
        harness.queue.enqueue(&task).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = tokio::spawn(WorkerPool::new(harness.context(), 1).run(shutdown_rx));

        loop {
            if let Some(result) = harness.queue.result(task.id).await {
                if result.state.is_terminal() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        shutdown_tx.send(true).unwrap();
        running.await.unwrap();

        let posting = harness.posting(id).await;
        assert_eq!(posting.status, PostingStatus::Processed);
        assert_eq!(posting.fields, Some(acme_fields()));
        assert_eq!(harness.extractor.calls(), 2);
        assert_eq!(harness.events().len(), 1);
        assert_eq!(harness.queue.result(task.id).await.unwrap().attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_processes_postings_in_parallel() {
        let harness = Harness::new(FlakyExtractor::failing_times(0));
        let mut tasks = Vec::new();
        for n in 0..5 {
            let id = harness.store.create(&format!("posting {}", n)).await.unwrap();
            let task = Task::new(id);
            harness.queue.enqueue(&task).await.unwrap();
            tasks.push(task);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = tokio::spawn(WorkerPool::new(harness.context(), 3).run(shutdown_rx));

        for task in &tasks {
            loop {
                if let Some(result) = harness.queue.result(task.id).await {
                    if result.state.is_terminal() {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        shutdown_tx.send(true).unwrap();
        running.await.unwrap();

        for posting in harness.store.list_all().await.unwrap() {
            assert_eq!(posting.status, PostingStatus::Processed);
        }
        assert_eq!(harness.events().len(), 5);
    }

    #[tokio::test]
    async fn test_pool_stops_when_shutdown_sender_dropped() {
        let harness = Harness::new(FlakyExtractor::failing_times(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = tokio::spawn(WorkerPool::new(harness.context(), 1).run(shutdown_rx));

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
    }
}
