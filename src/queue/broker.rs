//! Redis-backed broker.
//!
//! Layout:
//! - `jobalizer:tasks` list of ready tasks (LPUSH in, RPOP out, so FIFO)
//! - `jobalizer:tasks:delayed` sorted set of retries scored by due time in ms
//! - `jobalizer:results:<task_id>` latest [`TaskResult`] with a one-day TTL, kept
//!   on the result backend connection
//!
//! Due retries are moved from the sorted set to the list by a Lua script, so each
//! one is promoted exactly once even with several worker processes polling.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, error, info};

use super::{Task, TaskQueue, TaskResult, RESULT_TTL};
use crate::config::QueueConfig;
use crate::types::{AppError, AppResult};

pub const READY_KEY: &str = "jobalizer:tasks";
pub const DELAYED_KEY: &str = "jobalizer:tasks:delayed";
pub const RESULT_KEY_PREFIX: &str = "jobalizer:results:";

const PROMOTE_BATCH: usize = 100;

const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, task in ipairs(due) do
    redis.call('ZREM', KEYS[1], task)
    redis.call('LPUSH', KEYS[2], task)
end
return #due
"#;

pub struct RedisQueue {
    broker: ConnectionManager,
    results: ConnectionManager,
    promote: Script,
    poll_interval: Duration,
}

impl RedisQueue {
    pub async fn connect(
        broker_url: &str,
        result_backend_url: &str,
        poll_interval: Duration,
    ) -> AppResult<Self> {
        let broker = connect_manager(broker_url, "BROKER_URL").await?;
        let results = if result_backend_url == broker_url {
            broker.clone()
        } else {
            connect_manager(result_backend_url, "RESULT_BACKEND_URL").await?
        };

        info!("Connected to task broker");

        Ok(Self {
            broker,
            results,
            promote: Script::new(PROMOTE_SCRIPT),
            poll_interval,
        })
    }

    pub async fn from_config(config: &QueueConfig) -> AppResult<Self> {
        Self::connect(
            &config.broker_url,
            &config.result_backend_url,
            config.poll_interval(),
        )
        .await
    }

    /// Move retries whose delay has elapsed onto the ready list.
    async fn promote_due(&self) -> AppResult<usize> {
        let mut conn = self.broker.clone();
        let promoted: usize = self
            .promote
            .key(DELAYED_KEY)
            .key(READY_KEY)
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::Queue(format!("Failed to promote delayed tasks: {}", e)))?;

        if promoted > 0 {
            debug!(promoted, "Promoted delayed tasks");
        }
        Ok(promoted)
    }
}

async fn connect_manager(url: &str, key: &str) -> AppResult<ConnectionManager> {
    let client = redis::Client::open(url)
        .map_err(|e| AppError::Config(format!("Invalid {}: {}", key, e)))?;
    ConnectionManager::new(client)
        .await
        .map_err(|e| AppError::Queue(format!("Cannot reach {}: {}", key, e)))
}

pub fn result_key(task: &TaskResult) -> String {
    format!("{}{}", RESULT_KEY_PREFIX, task.task_id)
}

fn due_score(delay: Duration) -> i64 {
    Utc::now().timestamp_millis() + i64::try_from(delay.as_millis()).unwrap_or(i64::MAX / 2)
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn enqueue(&self, task: &Task) -> AppResult<()> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.broker.clone();

        let _: i64 = redis::cmd("LPUSH")
            .arg(READY_KEY)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Enqueue(e.to_string()))?;

        Ok(())
    }

    async fn schedule(&self, task: &Task, delay: Duration) -> AppResult<()> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.broker.clone();

        let _: i64 = redis::cmd("ZADD")
            .arg(DELAYED_KEY)
            .arg(due_score(delay))
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Queue(format!("Failed to schedule retry: {}", e)))?;

        Ok(())
    }

    async fn dequeue(&self) -> AppResult<Option<Task>> {
        self.promote_due().await?;

        let mut conn = self.broker.clone();
        let payload: Option<String> = redis::cmd("RPOP")
            .arg(READY_KEY)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Queue(format!("Failed to pop task: {}", e)))?;

        let Some(payload) = payload else {
            tokio::time::sleep(self.poll_interval).await;
            return Ok(None);
        };

        match serde_json::from_str::<Task>(&payload) {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                error!(error = %e, payload = %payload, "Discarding malformed task");
                Ok(None)
            }
        }
    }

    async fn record_result(&self, result: &TaskResult) -> AppResult<()> {
        let payload = serde_json::to_string(result)?;
        let mut conn = self.results.clone();

        let _: () = redis::cmd("SET")
            .arg(result_key(result))
            .arg(payload)
            .arg("EX")
            .arg(RESULT_TTL.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Queue(format!("Failed to record task result: {}", e)))?;

        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.broker.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Queue(e.to_string()))?;
        Ok(())
    }
}
