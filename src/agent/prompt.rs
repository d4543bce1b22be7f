//! Prompt assembly for agent mode.

use crate::config::AgentSettings;

const TOOL_PROTOCOL: &str = "When you need a tool, reply with ONLY a JSON object of the form \
{\"thought\": \"why\", \"tool\": \"tool_name\", \"parameters\": {...}}. \
Otherwise reply with the final answer as plain text.";

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    role: String,
    system_prompt: Option<String>,
}

impl PromptBuilder {
    pub fn new(role: impl Into<String>, system_prompt: Option<String>) -> Self {
        Self {
            role: role.into(),
            system_prompt,
        }
    }

    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self::new(settings.role.clone(), settings.system_prompt.clone())
    }

    /// Role instructions sent as the request's system prompt.
    pub fn system_instructions(&self) -> String {
        match &self.system_prompt {
            Some(prompt) if !prompt.trim().is_empty() => prompt.clone(),
            _ => format!(
                "You are a helpful {} replying to chat messages. Keep answers short and clear.",
                self.role
            ),
        }
    }

    /// First prompt of a turn: tools, prior history, then the new message.
    pub fn turn_prompt(&self, tool_definitions: &str, history: &str, user_text: &str) -> String {
        let mut parts = Vec::new();

        if !tool_definitions.is_empty() {
            parts.push(format!(
                "## Tools\n\n{}\n\n{}",
                tool_definitions, TOOL_PROTOCOL
            ));
        }
        if !history.is_empty() {
            parts.push(format!("## Conversation so far\n\n{}", history));
        }
        parts.push(format!("## New message\n\nUser: {}", user_text));

        parts.join("\n\n---\n\n")
    }

    /// Follow-up prompt once a tool has run. The model must answer directly.
    pub fn final_prompt(
        &self,
        history: &str,
        user_text: &str,
        tool: &str,
        tool_result: &str,
    ) -> String {
        let mut parts = Vec::new();

        if !history.is_empty() {
            parts.push(format!("## Conversation so far\n\n{}", history));
        }
        parts.push(format!("## New message\n\nUser: {}", user_text));
        parts.push(format!(
            "## Result of {}\n\n{}\n\nUsing this result, write the final answer for the user. \
Do not call another tool and do not reply with JSON.",
            tool, tool_result
        ));

        parts.join("\n\n---\n\n")
    }
}
