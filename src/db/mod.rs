//! Posting persistence.
//!
//! The store is the only shared mutable resource of the pipeline. Every operation is a
//! single-row statement; workers and web handlers share the pool but never a transaction.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::models::{JobFields, Posting};
use crate::types::AppResult;

pub use operations::*;
pub use pool::*;

pub mod operations;
pub mod pool;

#[async_trait]
pub trait PostingStore: Send + Sync {
    /// Insert a posting with status `new` and no fields, returning its id.
    async fn create(&self, content: &str) -> AppResult<i64>;

    async fn get(&self, id: i64) -> AppResult<Option<Posting>>;

    async fn list_all(&self) -> AppResult<Vec<Posting>>;

    /// Set status `processed` together with the extracted fields.
    async fn mark_processed(&self, id: i64, fields: &JobFields) -> AppResult<()>;

    /// Set status `failed` and clear fields. A `processed` row is left untouched;
    /// returns whether the row changed.
    async fn mark_failed(&self, id: i64) -> AppResult<bool>;

    async fn ping(&self) -> AppResult<()>;
}

pub async fn create_pool(config: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let mut options = SqlitePoolOptions::new().max_connections(config.max_connections);

    // An in-memory database lives exactly as long as its connection.
    if config.url.contains(":memory:") {
        options = options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let pool = options.connect(&config.url).await?;

    // Test connection
    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    info!("Database migrations completed");
    Ok(())
}
