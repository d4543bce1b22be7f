//! Bounded per-conversation history for agent mode.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool result",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    /// Unix millis.
    pub timestamp: i64,
}

/// Keeps the most recent `limit` entries per conversation.
#[derive(Debug)]
pub struct ConversationHistory {
    limit: usize,
    conversations: HashMap<String, VecDeque<HistoryEntry>>,
}

impl ConversationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            conversations: HashMap::new(),
        }
    }

    pub fn push(&mut self, conversation_id: &str, role: Role, content: &str) {
        let entries = self
            .conversations
            .entry(conversation_id.to_string())
            .or_default();

        entries.push_back(HistoryEntry {
            role,
            content: content.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
        while entries.len() > self.limit {
            entries.pop_front();
        }
    }

    pub fn entries(&self, conversation_id: &str) -> Vec<HistoryEntry> {
        self.conversations
            .get(conversation_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        self.conversations
            .get(conversation_id)
            .map_or(0, VecDeque::len)
    }

    pub fn clear(&mut self, conversation_id: &str) {
        self.conversations.remove(conversation_id);
    }

    /// Render the history as `Role: content` lines for a prompt.
    pub fn format(&self, conversation_id: &str) -> String {
        let Some(entries) = self.conversations.get(conversation_id) else {
            return String::new();
        };

        entries
            .iter()
            .map(|e| format!("{}: {}", e.role.label(), e.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
