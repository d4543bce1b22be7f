//! Tools the agent loop may call.
//!
//! Tool names are a closed set ([`ToolName`]); registration and lookup both
//! go through it, so an unknown name is a typed error rather than a string
//! match that silently misses.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::providers::{CompletionRequest, CompletionService};

const KNOWLEDGE_SEARCH_PROMPT: &str = "Answer strictly from the knowledge base. \
Quote the relevant facts concisely. If nothing relevant is found, reply with \
'No relevant information found.'";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    SearchKnowledge,
    CurrentTime,
}

impl ToolName {
    pub const ALL: [ToolName; 2] = [ToolName::SearchKnowledge, ToolName::CurrentTime];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::SearchKnowledge => "search_knowledge",
            ToolName::CurrentTime => "current_time",
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|name| name.as_str() == s.trim())
            .ok_or_else(|| ToolError::UnknownTool(s.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool not registered: {0}")]
    NotRegistered(ToolName),

    #[error("Invalid parameters for {tool}: {message}")]
    InvalidParameters { tool: ToolName, message: String },

    #[error("Tool {tool} failed: {message}")]
    Execution { tool: ToolName, message: String },
}

/// Per-call context handed to a tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub conversation_id: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Must parse as a [`ToolName`].
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Parameter description shown to the model.
    fn parameters(&self) -> serde_json::Value;

    async fn execute(
        &self,
        ctx: &ToolContext,
        parameters: &serde_json::Value,
    ) -> Result<String, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools backed by `completion`.
    pub fn with_builtin(completion: Arc<dyn CompletionService>) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        registry.register(Arc::new(SearchKnowledgeTool::new(completion)))?;
        registry.register(Arc::new(CurrentTimeTool))?;
        Ok(registry)
    }

    /// Register a tool, replacing any previous one with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<ToolName, ToolError> {
        let name: ToolName = tool.name().parse()?;
        if self.tools.insert(name, tool).is_some() {
            tracing::debug!(tool = %name, "Replaced registered tool");
        }
        Ok(name)
    }

    pub fn get(&self, name: ToolName) -> Option<&Arc<dyn Tool>> {
        self.tools.get(&name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up a tool by the name the model used and run it.
    pub async fn execute(
        &self,
        name: &str,
        ctx: &ToolContext,
        parameters: &serde_json::Value,
    ) -> Result<String, ToolError> {
        let name: ToolName = name.parse()?;
        let tool = self.get(name).ok_or(ToolError::NotRegistered(name))?;
        tool.execute(ctx, parameters).await
    }

    /// Tool list for the prompt, in a stable order.
    pub fn definitions(&self) -> String {
        ToolName::ALL
            .into_iter()
            .filter_map(|name| self.tools.get(&name))
            .map(|tool| {
                format!(
                    "- {}: {} Parameters: {}",
                    tool.name(),
                    tool.description(),
                    tool.parameters()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Queries the completion service's knowledge base.
pub struct SearchKnowledgeTool {
    completion: Arc<dyn CompletionService>,
}

impl SearchKnowledgeTool {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }
}

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn name(&self) -> &str {
        ToolName::SearchKnowledge.as_str()
    }

    fn description(&self) -> &str {
        "Search the knowledge base for facts relevant to the user's question."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"query": "string, what to look up"})
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        parameters: &serde_json::Value,
    ) -> Result<String, ToolError> {
        let query = parameters
            .get("query")
            .and_then(|q| q.as_str())
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidParameters {
                tool: ToolName::SearchKnowledge,
                message: "missing 'query'".to_string(),
            })?;

        // Separate identity so lookups do not land in the user's session.
        let request = CompletionRequest::new(format!("{}:knowledge", ctx.conversation_id), query)
            .with_system_prompt(KNOWLEDGE_SEARCH_PROMPT)
            .with_metadata(serde_json::json!({"purpose": "knowledge_search"}));

        self.completion
            .complete(&request)
            .await
            .map_err(|e| ToolError::Execution {
                tool: ToolName::SearchKnowledge,
                message: e.to_string(),
            })
    }
}

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        ToolName::CurrentTime.as_str()
    }

    fn description(&self) -> &str {
        "Get the current date and time (UTC)."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    async fn execute(
        &self,
        _ctx: &ToolContext,
        _parameters: &serde_json::Value,
    ) -> Result<String, ToolError> {
        Ok(chrono::Utc::now()
            .format("%A, %Y-%m-%d %H:%M UTC")
            .to_string())
    }
}
