use sqlx::sqlite::SqlitePool;

pub async fn health_check(pool: &SqlitePool) -> Result<bool, sqlx::Error> {
    let _result = sqlx::query("SELECT 1").fetch_one(pool).await?;

    Ok(true)
}
