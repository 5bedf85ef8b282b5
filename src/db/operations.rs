use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use super::{health_check, PostingStore};
use crate::models::{JobFields, Posting, PostingStatus};
use crate::types::{AppError, AppResult};

/// Row shape of `job_postings`; `status` and `fields` are text columns.
#[derive(Debug, sqlx::FromRow)]
struct PostingRow {
    id: i64,
    content: String,
    status: String,
    fields: Option<String>,
}

impl TryFrom<PostingRow> for Posting {
    type Error = AppError;

    fn try_from(row: PostingRow) -> AppResult<Self> {
        let status = row
            .status
            .parse::<PostingStatus>()
            .map_err(|e| AppError::Internal(format!("posting {}: {}", row.id, e)))?;

        let fields = match row.fields.as_deref() {
            Some(raw) => Some(serde_json::from_str::<JobFields>(raw).map_err(|e| {
                AppError::Internal(format!("posting {} has unreadable fields: {}", row.id, e))
            })?),
            None => None,
        };

        Ok(Posting {
            id: row.id,
            content: row.content,
            status,
            fields,
        })
    }
}

#[derive(Clone)]
pub struct SqlitePostingStore {
    pool: SqlitePool,
}

impl SqlitePostingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl PostingStore for SqlitePostingStore {
    async fn create(&self, content: &str) -> AppResult<i64> {
        let result = sqlx::query("INSERT INTO job_postings (content, status) VALUES (?, ?)")
            .bind(content)
            .bind(PostingStatus::New.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get(&self, id: i64) -> AppResult<Option<Posting>> {
        let row = sqlx::query_as::<_, PostingRow>(
            "SELECT id, content, status, fields FROM job_postings WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Posting::try_from).transpose()
    }

    async fn list_all(&self) -> AppResult<Vec<Posting>> {
        let rows = sqlx::query_as::<_, PostingRow>(
            "SELECT id, content, status, fields FROM job_postings ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Posting::try_from).collect()
    }

    async fn mark_processed(&self, id: i64, fields: &JobFields) -> AppResult<()> {
        let json = serde_json::to_string(fields)?;

        let result = sqlx::query("UPDATE job_postings SET status = ?, fields = ? WHERE id = ?")
            .bind(PostingStatus::Processed.as_str())
            .bind(json)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("posting {}", id)));
        }

        Ok(())
    }

    async fn mark_failed(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE job_postings SET status = ?, fields = NULL WHERE id = ? AND status <> ?",
        )
        .bind(PostingStatus::Failed.as_str())
        .bind(id)
        .bind(PostingStatus::Processed.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> AppResult<()> {
        health_check(&self.pool).await?;
        Ok(())
    }
}
