//! HTTP Routes
//!
//! - `/` - Posting list and submission form
//! - `/input` - Form submission (redirects back to `/`)
//! - `/ws` - Live `job_processed` notifications
//! - `/api/postings` - Read-only JSON views
//! - `/api/health` - Database and broker status

pub mod flash;
pub mod health;
pub mod postings;
pub mod ui;
pub mod ws;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    Router::new()
        .merge(ui::router(state.clone()))
        .merge(ws::router(state.clone()))
        .merge(postings::router(state.clone()))
        .merge(health::router(state))
        .layer(TraceLayer::new_for_http())
}
