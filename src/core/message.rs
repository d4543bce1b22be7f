//! Inbound message types.

use serde::{Deserialize, Serialize};

/// Media attached to an inbound message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttachment {
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Base64 payload, for channels that deliver media inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// An accepted event from the channel binding.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub conversation_id: String,
    /// Generated when the channel does not supply one.
    #[serde(default = "new_message_id")]
    pub message_id: String,
    pub text: String,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    /// Channel timestamp in unix millis.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

fn new_message_id() -> String {
    ulid::Ulid::new().to_string()
}

/// A message waiting in (or taken from) a conversation queue.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub conversation_id: String,
    pub message_id: String,
    pub text: String,
    pub is_group: bool,
    pub sender_name: Option<String>,
    pub media: Vec<MediaAttachment>,
    pub timestamp: i64,
    /// Unix millis at enqueue time.
    pub enqueued_at: i64,
}

impl QueuedMessage {
    /// Create a plain text message stamped with the current time.
    pub fn new(conversation_id: &str, message_id: &str, text: &str) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            text: text.to_string(),
            is_group: false,
            sender_name: None,
            media: Vec::new(),
            timestamp: now,
            enqueued_at: now,
        }
    }

    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }
}

impl From<InboundMessage> for QueuedMessage {
    fn from(inbound: InboundMessage) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            conversation_id: inbound.conversation_id,
            message_id: inbound.message_id,
            text: inbound.text,
            is_group: inbound.is_group,
            sender_name: inbound.sender_name,
            media: inbound.media,
            timestamp: inbound.timestamp.unwrap_or(now),
            enqueued_at: now,
        }
    }
}
