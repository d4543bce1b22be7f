//! Sender that only logs replies. Used when no response URL is configured.

use async_trait::async_trait;

use crate::error::Result;
use crate::worker::MessageSender;

#[derive(Debug, Clone)]
pub struct LogSender {
    fallback_text: String,
}

impl LogSender {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self {
            fallback_text: fallback_text.into(),
        }
    }
}

#[async_trait]
impl MessageSender for LogSender {
    async fn send_response(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<()> {
        tracing::info!(conversation_id, message_id, reply = %text, "Reply (log only)");
        Ok(())
    }

    async fn send_fallback(&self, conversation_id: &str) -> Result<()> {
        tracing::info!(conversation_id, reply = %self.fallback_text, "Fallback (log only)");
        Ok(())
    }
}
