use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

use crate::models::{AppState, HealthResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = state.store.ping().await;
    let queue = state.queue.ping().await;

    let status = if database.is_ok() && queue.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let describe = |result: &crate::types::AppResult<()>| match result {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("unavailable: {}", e),
    };

    let response = HealthResponse {
        status: if status == StatusCode::OK { "ok" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        database: describe(&database),
        queue: describe(&queue),
    };

    (status, Json(response))
}
