// Jobalizer - job posting intake with asynchronous LLM field extraction

pub mod config;
pub mod db;
pub mod extraction;
pub mod intake;
pub mod llm;
pub mod models;
pub mod notify;
pub mod queue;
pub mod routes;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
