//! Message worker: turns an admitted message into exactly one reply.
//!
//! Any failure past this point ends in a single fallback send; nothing
//! propagates back into the dispatch queue.

pub mod sender;

pub use sender::{EscalationHook, EscalationNotice, MessageSender};

use async_trait::async_trait;
use std::sync::Arc;

use crate::agent::{AgentLoop, PromptBuilder};
use crate::config::Settings;
use crate::core::{MessageProcessor, ProcessOutcome, QueuedMessage};
use crate::error::Result;
use crate::providers::{CompletionRequest, CompletionService};

/// How replies are produced.
pub enum WorkerMode {
    /// One completion call per message.
    Direct,
    /// Tool-calling agent with conversation history.
    Agent(AgentLoop),
}

impl WorkerMode {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerMode::Direct => "direct",
            WorkerMode::Agent(_) => "agent",
        }
    }
}

pub struct Worker {
    completion: Arc<dyn CompletionService>,
    mode: WorkerMode,
    system_prompt: String,
    sender: Arc<dyn MessageSender>,
    escalation: Option<Arc<dyn EscalationHook>>,
}

impl Worker {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        mode: WorkerMode,
        system_prompt: String,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        Self {
            completion,
            mode,
            system_prompt,
            sender,
            escalation: None,
        }
    }

    /// Worker in the mode `agent.enabled` selects.
    pub fn from_settings(
        settings: &Settings,
        completion: Arc<dyn CompletionService>,
        sender: Arc<dyn MessageSender>,
    ) -> Result<Self> {
        let mode = if settings.agent.enabled {
            WorkerMode::Agent(AgentLoop::from_settings(&settings.agent, completion.clone())?)
        } else {
            WorkerMode::Direct
        };
        let system_prompt = PromptBuilder::from_settings(&settings.agent).system_instructions();

        tracing::info!(mode = mode.name(), "Worker configured");
        Ok(Self::new(completion, mode, system_prompt, sender))
    }

    pub fn with_escalation(mut self, hook: Arc<dyn EscalationHook>) -> Self {
        self.escalation = Some(hook);
        self
    }

    pub fn mode(&self) -> &WorkerMode {
        &self.mode
    }

    /// Produce and deliver the reply. Never fails; see [`ProcessOutcome`].
    pub async fn process(&self, message: &QueuedMessage) -> ProcessOutcome {
        match self.handle(message).await {
            Ok(()) => ProcessOutcome::Processed,
            Err(e) => {
                tracing::error!(
                    conversation_id = %message.conversation_id,
                    message_id = %message.message_id,
                    error = %e,
                    "Message processing failed"
                );
                if let Err(e) = self.sender.send_fallback(&message.conversation_id).await {
                    tracing::error!(
                        conversation_id = %message.conversation_id,
                        error = %e,
                        "Failed to send fallback"
                    );
                }
                ProcessOutcome::Failed
            }
        }
    }

    async fn handle(&self, message: &QueuedMessage) -> Result<()> {
        let answer = match &self.mode {
            WorkerMode::Direct => {
                let request = self.direct_request(message);
                self.completion.complete(&request).await?
            }
            WorkerMode::Agent(agent) => {
                let response = agent.run(&message.conversation_id, &message.text).await?;
                tracing::debug!(
                    conversation_id = %message.conversation_id,
                    tool_calls = response.tool_calls_count,
                    iterations = response.iterations,
                    "Agent turn finished"
                );
                response.response
            }
        };

        self.sender
            .send_response(&message.conversation_id, &message.message_id, &answer)
            .await?;
        tracing::info!(
            conversation_id = %message.conversation_id,
            message_id = %message.message_id,
            chars = answer.len(),
            "Reply sent"
        );

        if let Some(hook) = &self.escalation {
            if let Some(notice) = hook.evaluate(message, &answer).await {
                // The user already has their answer; a lost notice is only logged.
                if let Err(e) = self
                    .sender
                    .send_response(&notice.conversation_id, &message.message_id, &notice.text)
                    .await
                {
                    tracing::warn!(
                        conversation_id = %notice.conversation_id,
                        error = %e,
                        "Failed to send escalation notice"
                    );
                }
            }
        }

        Ok(())
    }

    fn direct_request(&self, message: &QueuedMessage) -> CompletionRequest {
        CompletionRequest::new(&message.conversation_id, &message.text)
            .with_system_prompt(&self.system_prompt)
            .with_metadata(serde_json::json!({
                "messageId": message.message_id,
                "isGroup": message.is_group,
                "senderName": message.sender_name,
                "media": message.media,
            }))
    }
}

#[async_trait]
impl MessageProcessor for Worker {
    async fn process(&self, message: QueuedMessage) -> ProcessOutcome {
        Worker::process(self, &message).await
    }
}
