//! Inbound endpoint for channel bridges.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::core::{DispatchError, InboundMessage, QueuedMessage};
use crate::web::router::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub conversation_id: String,
    pub message_id: String,
    /// Messages now waiting for this conversation.
    pub pending: usize,
}

/// Queue an inbound message. Replies go out through the configured sender.
pub async fn enqueue_message(
    State(state): State<AppState>,
    Json(payload): Json<InboundMessage>,
) -> Result<(StatusCode, Json<EnqueueResponse>), StatusCode> {
    if payload.conversation_id.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let message = QueuedMessage::from(payload);
    let conversation_id = message.conversation_id.clone();
    let message_id = message.message_id.clone();

    let pending = state.queue.enqueue(message).await.map_err(|e| {
        tracing::warn!(conversation_id = %conversation_id, error = %e, "Rejected inbound message");
        match e {
            DispatchError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::ShutDown | DispatchError::AlreadyRunning => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            conversation_id,
            message_id,
            pending,
        }),
    ))
}
