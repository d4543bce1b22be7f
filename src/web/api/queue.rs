//! Queue administration endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::core::{DispatchStats, RateLimiterStats};
use crate::web::router::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatsResponse {
    pub dispatch: DispatchStats,
    pub rate_limiter: RateLimiterStats,
    pub max_concurrency: usize,
    pub running: bool,
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

pub async fn queue_stats(State(state): State<AppState>) -> Json<QueueStatsResponse> {
    Json(QueueStatsResponse {
        dispatch: state.queue.stats().await,
        rate_limiter: state.queue.rate_limiter_stats().await,
        max_concurrency: state.queue.max_concurrency(),
        running: state.queue.is_running(),
    })
}

pub async fn clear_all(State(state): State<AppState>) -> Json<ClearResponse> {
    Json(ClearResponse {
        cleared: state.queue.clear_all().await,
    })
}

pub async fn clear_chat(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<ClearResponse> {
    Json(ClearResponse {
        cleared: state.queue.clear_chat(&conversation_id).await,
    })
}
