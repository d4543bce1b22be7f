//! Route definitions for web server.

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use super::api;
use crate::core::DispatchQueue;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<DispatchQueue>,
}

/// Create the API router.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        // Queue administration
        .route("/queue/stats", get(api::queue_stats))
        .route("/queue", delete(api::clear_all))
        .route("/queue/:conversation_id", delete(api::clear_chat))
        // Inbound
        .route("/messages", post(api::enqueue_message))
}

/// Create the full app router.
pub fn create_app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", create_api_router())
        .route("/health", get(health_check))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
