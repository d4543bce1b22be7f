//! Collaborators the worker talks to on the way out.

use async_trait::async_trait;

use crate::core::QueuedMessage;
use crate::error::Result;

/// Delivers replies back to the messaging channel.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_response(&self, conversation_id: &str, message_id: &str, text: &str)
        -> Result<()>;

    /// Generic "couldn't process that" notice after a failed message.
    async fn send_fallback(&self, conversation_id: &str) -> Result<()>;
}

/// A message the escalation check wants delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationNotice {
    /// Where to send it; usually an operator's conversation.
    pub conversation_id: String,
    pub text: String,
}

/// Decides whether a finished exchange needs a human.
#[async_trait]
pub trait EscalationHook: Send + Sync {
    async fn evaluate(&self, message: &QueuedMessage, answer: &str) -> Option<EscalationNotice>;
}
