use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::error;

use crate::models::{AppState, Posting, PostingListResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/postings", get(list_postings))
        .route("/api/postings/{id}", get(get_posting))
        .with_state(state)
}

async fn list_postings(State(state): State<AppState>) -> Json<PostingListResponse> {
    let (postings, warning) = state.intake().index().await;
    Json(PostingListResponse { postings, warning })
}

async fn get_posting(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Posting>, (StatusCode, Json<serde_json::Value>)> {
    match state.store.get(id).await {
        Ok(Some(posting)) => Ok(Json(posting)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("posting {} not found", id) })),
        )),
        Err(e) => {
            error!(posting_id = id, error = %e, "Error fetching posting");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "An error occurred while fetching the job posting." })),
            ))
        }
    }
}
