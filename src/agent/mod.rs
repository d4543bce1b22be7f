//! Agent mode: one model call per turn, plus at most one tool round-trip.
//!
//! The model asks for a tool by embedding a JSON object with a `tool` field
//! in its reply. After the tool runs, a second call produces the final answer
//! and the turn ends; the loop never goes back for another tool.

pub mod history;
pub mod prompt;
pub mod tools;

pub use history::{ConversationHistory, HistoryEntry, Role};
pub use prompt::PromptBuilder;
pub use tools::{Tool, ToolContext, ToolError, ToolName, ToolRegistry};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

use crate::config::AgentSettings;
use crate::providers::{ClientError, CompletionRequest, CompletionService};

/// Returned when the iteration bound leaves no room for a model call.
pub const ITERATION_LIMIT_REPLY: &str =
    "I'm sorry, I wasn't able to finish working on that. Could you try rephrasing your question?";

/// Tool request embedded in a model reply.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    pub tool: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub response: String,
    pub tool_calls_count: u32,
    /// Completion-service calls made this turn.
    pub iterations: u32,
}

/// Find the first `{...}` span mentioning `"tool"` and parse it.
///
/// A span that does not parse as a tool call is not a tool call; the caller
/// treats the whole reply as the final answer.
pub fn extract_tool_call(raw: &str) -> Option<ToolCall> {
    static TOOL_CALL: OnceLock<Option<Regex>> = OnceLock::new();
    let re = TOOL_CALL
        .get_or_init(|| Regex::new(r#"(?s)\{.*"tool".*\}"#).ok())
        .as_ref()?;

    let span = re.find(raw)?;
    match serde_json::from_str::<ToolCall>(span.as_str()) {
        Ok(call) if !call.tool.trim().is_empty() => Some(call),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Reply mentions a tool but is not a tool call");
            None
        }
    }
}

pub struct AgentLoop {
    completion: Arc<dyn CompletionService>,
    tools: ToolRegistry,
    history: Mutex<ConversationHistory>,
    prompts: PromptBuilder,
    max_iterations: u32,
}

impl AgentLoop {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        tools: ToolRegistry,
        prompts: PromptBuilder,
        history_limit: usize,
        max_iterations: u32,
    ) -> Self {
        Self {
            completion,
            tools,
            history: Mutex::new(ConversationHistory::new(history_limit)),
            prompts,
            max_iterations,
        }
    }

    /// Agent with the built-in tools, configured from settings.
    pub fn from_settings(
        settings: &AgentSettings,
        completion: Arc<dyn CompletionService>,
    ) -> Result<Self, ToolError> {
        let tools = ToolRegistry::with_builtin(completion.clone())?;
        Ok(Self::new(
            completion,
            tools,
            PromptBuilder::from_settings(settings),
            settings.conversation_history_limit,
            settings.max_iterations,
        ))
    }

    pub async fn history(&self, conversation_id: &str) -> Vec<HistoryEntry> {
        self.history.lock().await.entries(conversation_id)
    }

    /// Handle one user turn.
    ///
    /// Completion-service failures propagate; tool failures become the
    /// tool's result text and the turn carries on.
    pub async fn run(
        &self,
        conversation_id: &str,
        user_text: &str,
    ) -> Result<AgentResponse, ClientError> {
        if self.max_iterations == 0 {
            return Ok(AgentResponse {
                response: ITERATION_LIMIT_REPLY.to_string(),
                tool_calls_count: 0,
                iterations: 0,
            });
        }

        // Prior turns only; the new message goes in its own prompt section.
        let prior = {
            let mut history = self.history.lock().await;
            let prior = history.format(conversation_id);
            history.push(conversation_id, Role::User, user_text);
            prior
        };

        let system = self.prompts.system_instructions();
        let prompt = self
            .prompts
            .turn_prompt(&self.tools.definitions(), &prior, user_text);
        let reply = self.ask(conversation_id, prompt, &system).await?;

        let Some(call) = extract_tool_call(&reply) else {
            self.remember(conversation_id, Role::Assistant, &reply).await;
            return Ok(AgentResponse {
                response: reply,
                tool_calls_count: 0,
                iterations: 1,
            });
        };

        let call_json = serde_json::to_string(&call).unwrap_or_else(|_| call.tool.clone());
        self.remember(conversation_id, Role::Assistant, &call_json).await;

        let ctx = ToolContext {
            conversation_id: conversation_id.to_string(),
        };
        tracing::info!(conversation_id, tool = %call.tool, "Executing tool");
        let result = match self.tools.execute(&call.tool, &ctx, &call.parameters).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(conversation_id, tool = %call.tool, error = %e, "Tool failed");
                format!("Error: {}", e)
            }
        };
        self.remember(conversation_id, Role::Tool, &result).await;

        let prompt = self
            .prompts
            .final_prompt(&prior, user_text, &call.tool, &result);
        let answer = self.ask(conversation_id, prompt, &system).await?;
        self.remember(conversation_id, Role::Assistant, &answer).await;

        Ok(AgentResponse {
            response: answer,
            tool_calls_count: 1,
            iterations: 2,
        })
    }

    async fn ask(
        &self,
        conversation_id: &str,
        prompt: String,
        system: &str,
    ) -> Result<String, ClientError> {
        let request = CompletionRequest::new(conversation_id, prompt).with_system_prompt(system);
        self.completion.complete(&request).await
    }

    async fn remember(&self, conversation_id: &str, role: Role, content: &str) {
        self.history.lock().await.push(conversation_id, role, content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Replies from a script, recording every request.
    struct ScriptedCompletion {
        replies: StdMutex<VecDeque<Result<String, ClientError>>>,
        requests: StdMutex<Vec<CompletionRequest>>,
    }

    impl ScriptedCompletion {
        fn new(replies: Vec<Result<String, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: StdMutex::new(replies.into()),
                requests: StdMutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedCompletion {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, ClientError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("out of script".to_string()))
        }
    }

    struct StubSearch {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Tool for StubSearch {
        fn name(&self) -> &str {
            "search_knowledge"
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"query": "string"})
        }

        async fn execute(
            &self,
            _ctx: &ToolContext,
            parameters: &serde_json::Value,
        ) -> Result<String, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(parameters["query"], "malaria");
            if self.fail {
                return Err(ToolError::Execution {
                    tool: ToolName::SearchKnowledge,
                    message: "index offline".to_string(),
                });
            }
            Ok("Malaria is...".to_string())
        }
    }

    fn agent_with(
        completion: Arc<ScriptedCompletion>,
        search: Arc<StubSearch>,
        max_iterations: u32,
    ) -> AgentLoop {
        let mut tools = ToolRegistry::new();
        tools.register(search).unwrap();
        AgentLoop::new(
            completion,
            tools,
            PromptBuilder::new("health assistant", None),
            10,
            max_iterations,
        )
    }

    fn stub_search(fail: bool) -> Arc<StubSearch> {
        Arc::new(StubSearch {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[test]
    fn test_extract_tool_call() {
        let call = extract_tool_call(
            r#"Let me check. {"thought": "look it up", "tool": "search_knowledge", "parameters": {"query": "malaria"}}"#,
        )
        .unwrap();
        assert_eq!(call.tool, "search_knowledge");
        assert_eq!(call.thought.as_deref(), Some("look it up"));
        assert_eq!(call.parameters["query"], "malaria");

        assert!(extract_tool_call("Malaria is spread by mosquitoes.").is_none());
        assert!(extract_tool_call(r#"I used a {"tool" once, broken"#).is_none());
    }

    #[tokio::test]
    async fn test_run_without_tool_returns_text_verbatim() {
        let completion = ScriptedCompletion::new(vec![Ok("Drink water and rest.".to_string())]);
        let search = stub_search(false);
        let agent = agent_with(completion.clone(), search.clone(), 3);

        let response = agent.run("c1", "I have a cold").await.unwrap();

        assert_eq!(response.response, "Drink water and rest.");
        assert_eq!(response.tool_calls_count, 0);
        assert_eq!(response.iterations, 1);
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);

        let history = agent.history("c1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "Drink water and rest.");
    }

    #[tokio::test]
    async fn test_run_with_one_tool_round_trip() {
        crate::logging::init_test();
        let completion = ScriptedCompletion::new(vec![
            Ok(r#"{"tool":"search_knowledge","parameters":{"query":"malaria"}}"#.to_string()),
            Ok("Malaria is a mosquito-borne disease.".to_string()),
        ]);
        let search = stub_search(false);
        let agent = agent_with(completion.clone(), search.clone(), 3);

        let response = agent.run("c1", "What is malaria?").await.unwrap();

        assert_eq!(response.response, "Malaria is a mosquito-borne disease.");
        assert_eq!(response.tool_calls_count, 1);
        assert_eq!(response.iterations, 2);
        assert_eq!(search.calls.load(Ordering::SeqCst), 1);

        let requests = completion.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].message.contains("Malaria is..."));
        assert!(requests[1].message.contains("Do not call another tool"));
        assert!(requests.iter().all(|r| r.identity_key == "c1"));

        let roles: Vec<Role> = agent.history("c1").await.iter().map(|e| e.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_second_reply_asking_for_tool_is_still_final() {
        let tool_reply = r#"{"tool":"search_knowledge","parameters":{"query":"malaria"}}"#;
        let completion = ScriptedCompletion::new(vec![
            Ok(tool_reply.to_string()),
            Ok(tool_reply.to_string()),
        ]);
        let search = stub_search(false);
        let agent = agent_with(completion.clone(), search.clone(), 10);

        let response = agent.run("c1", "What is malaria?").await.unwrap();

        assert_eq!(response.response, tool_reply);
        assert_eq!(search.calls.load(Ordering::SeqCst), 1);
        assert_eq!(completion.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_tool_failure_is_fed_back_as_result() {
        let completion = ScriptedCompletion::new(vec![
            Ok(r#"{"tool":"search_knowledge","parameters":{"query":"malaria"}}"#.to_string()),
            Ok("I couldn't look that up, sorry.".to_string()),
        ]);
        let agent = agent_with(completion.clone(), stub_search(true), 3);

        let response = agent.run("c1", "What is malaria?").await.unwrap();

        assert_eq!(response.response, "I couldn't look that up, sorry.");
        assert_eq!(response.tool_calls_count, 1);
        assert!(completion.requests()[1].message.contains("index offline"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_a_soft_failure() {
        let completion = ScriptedCompletion::new(vec![
            Ok(r#"{"tool":"book_flight","parameters":{}}"#.to_string()),
            Ok("I can't do that.".to_string()),
        ]);
        let agent = agent_with(completion.clone(), stub_search(false), 3);

        let response = agent.run("c1", "fly me to Lagos").await.unwrap();

        assert_eq!(response.response, "I can't do that.");
        assert!(completion.requests()[1].message.contains("Unknown tool: book_flight"));
    }

    #[tokio::test]
    async fn test_single_iteration_still_allows_one_tool_round_trip() {
        let completion = ScriptedCompletion::new(vec![
            Ok(r#"{"tool":"search_knowledge","parameters":{"query":"malaria"}}"#.to_string()),
            Ok("Malaria is a mosquito-borne disease.".to_string()),
        ]);
        let search = stub_search(false);
        let agent = agent_with(completion.clone(), search.clone(), 1);

        let response = agent.run("c1", "What is malaria?").await.unwrap();

        assert_eq!(response.response, "Malaria is a mosquito-borne disease.");
        assert_eq!(response.tool_calls_count, 1);
        assert_eq!(response.iterations, 2);
        assert_eq!(search.calls.load(Ordering::SeqCst), 1);
        assert_eq!(completion.requests().len(), 2);
        assert_eq!(agent.history("c1").await.len(), 4);
    }

    #[tokio::test]
    async fn test_zero_iterations_returns_apology() {
        let completion = ScriptedCompletion::new(vec![]);
        let agent = agent_with(completion.clone(), stub_search(false), 0);

        let response = agent.run("c1", "hello").await.unwrap();

        assert_eq!(response.response, ITERATION_LIMIT_REPLY);
        assert_eq!(response.iterations, 0);
        assert!(completion.requests().is_empty());
    }

    #[tokio::test]
    async fn test_completion_failure_propagates() {
        let completion = ScriptedCompletion::new(vec![Err(ClientError::Rejected {
            operation: "chat".into(),
            status: 401,
            body: "bad key".into(),
        })]);
        let agent = agent_with(completion, stub_search(false), 3);

        let err = agent.run("c1", "hello").await.unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn test_history_is_in_the_next_prompt_once() {
        let completion = ScriptedCompletion::new(vec![
            Ok("Hi there!".to_string()),
            Ok("You said hello.".to_string()),
        ]);
        let agent = agent_with(completion.clone(), stub_search(false), 3);

        agent.run("c1", "hello").await.unwrap();
        agent.run("c1", "what did I say?").await.unwrap();

        let second = &completion.requests()[1].message;
        assert!(second.contains("User: hello\nAssistant: Hi there!"));
        assert_eq!(second.matches("what did I say?").count(), 1);
    }
}
