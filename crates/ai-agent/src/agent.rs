use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::language_model::{LanguageModelClient, LanguageModelError, Message, ModelOptions};
use crate::tool::{ToolCall, ToolDescriptor};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_tool_iterations: usize,
    /// Characters of a tool result shown to the model in single-turn tasks.
    pub tool_result_limit: usize,
    pub model_options: ModelOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: crate::DEFAULT_MAX_TOOL_ITERATIONS,
            tool_result_limit: crate::DEFAULT_TOOL_RESULT_LIMIT,
            model_options: ModelOptions::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent initialization failed: {0}")]
    Initialization(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("{0}")]
    ToolExecution(String),
    #[error("agent cleanup failed: {0}")]
    Cleanup(String),
    #[error(transparent)]
    Model(#[from] LanguageModelError),
}

/// Outcome of a single-turn task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    pub final_text: String,
    /// Raw text of the last successful tool result, empty when none ran.
    pub last_tool_context: String,
}

/// What distinguishes one agent from another: its instructions, its tools
/// and how it runs them. [`Agent`] drives the shared loop.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    fn name(&self) -> &str;

    fn system_prompt(&self, tools_description: &str) -> String;

    async fn tools(&self) -> Result<Vec<ToolDescriptor>, AgentError> {
        Ok(Vec::new())
    }

    async fn execute_tool(&self, call: &ToolCall) -> Result<String, AgentError> {
        Err(AgentError::UnknownTool(call.tool.clone()))
    }

    /// Connects whatever tool sources the agent declares.
    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

enum ToolOutcome {
    Completed(String),
    Failed(String),
}

impl ToolOutcome {
    fn message(&self) -> String {
        match self {
            ToolOutcome::Completed(text) => format!("Tool execution result: {text}"),
            ToolOutcome::Failed(err) => format!("Error executing tool: {err}"),
        }
    }
}

pub struct Agent<B> {
    behavior: B,
    model: Arc<dyn LanguageModelClient>,
    config: AgentConfig,
    tools: Vec<ToolDescriptor>,
    tools_description: String,
    conversation: Vec<Message>,
    initialized: bool,
}

impl<B: AgentBehavior> Agent<B> {
    pub fn new(behavior: B, model: Arc<dyn LanguageModelClient>, config: AgentConfig) -> Self {
        Self {
            behavior,
            model,
            config,
            tools: Vec::new(),
            tools_description: String::new(),
            conversation: Vec::new(),
            initialized: false,
        }
    }

    pub fn name(&self) -> &str {
        self.behavior.name()
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    pub fn behavior_mut(&mut self) -> &mut B {
        &mut self.behavior
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Built from current state on every model call; never stored in the
    /// conversation.
    pub fn system_message(&self) -> Message {
        Message::system(self.behavior.system_prompt(&self.tools_description))
    }

    pub async fn initialize(&mut self) -> Result<(), AgentError> {
        if self.initialized {
            return Ok(());
        }
        self.behavior.initialize().await?;
        self.tools = self.behavior.tools().await?;
        self.tools_description = self
            .tools
            .iter()
            .map(ToolDescriptor::format_for_llm)
            .collect::<Vec<_>>()
            .join("\n");
        self.initialized = true;
        info!(
            agent = self.behavior.name(),
            tools = self.tools.len(),
            "agent initialized"
        );
        Ok(())
    }

    /// Runs one user turn against the persistent conversation and returns the
    /// model's final text.
    pub async fn process(&mut self, input: &str) -> Result<String, AgentError> {
        self.initialize().await?;
        info!(agent = self.behavior.name(), "processing user input");

        self.conversation.push(Message::user(input));
        let mut response = self.respond(&self.conversation).await?;
        self.conversation.push(Message::assistant(response.clone()));

        let mut iterations = 0;
        while iterations < self.config.max_tool_iterations {
            let Some(call) = ToolCall::parse(&response) else {
                debug!(agent = self.behavior.name(), "no tool call, ending loop");
                break;
            };
            iterations += 1;
            debug!(agent = self.behavior.name(), iteration = iterations, tool = %call.tool, "running tool");

            let outcome = self.run_tool(&call).await;
            self.conversation.push(Message::system(outcome.message()));
            response = self.respond(&self.conversation).await?;
            self.conversation.push(Message::assistant(response.clone()));
        }
        self.warn_if_exhausted(iterations, &response);

        Ok(response)
    }

    /// Runs the loop over a fresh single-turn exchange. Only the request and
    /// the latest tool result are shown to the model after each call.
    pub async fn process_task(&mut self, request: &str) -> Result<AgentResult, AgentError> {
        self.initialize().await?;
        info!(agent = self.behavior.name(), "processing single-turn task");

        let request = Message::user(request);
        let mut response = self.respond(std::slice::from_ref(&request)).await?;
        let mut last_tool_context = String::new();

        let mut iterations = 0;
        while iterations < self.config.max_tool_iterations {
            let Some(call) = ToolCall::parse(&response) else {
                break;
            };
            iterations += 1;
            debug!(agent = self.behavior.name(), iteration = iterations, tool = %call.tool, "running tool");

            let outcome = self.run_tool(&call).await;
            let message = outcome.message();
            let turn = [
                request.clone(),
                Message::system(truncate_chars(&message, self.config.tool_result_limit)),
            ];
            if let ToolOutcome::Completed(text) = outcome {
                last_tool_context = text;
            }
            response = self.respond(&turn).await?;
        }
        self.warn_if_exhausted(iterations, &response);

        Ok(AgentResult {
            final_text: response,
            last_tool_context,
        })
    }

    pub fn reset_conversation(&mut self) {
        self.conversation.clear();
    }

    pub async fn cleanup(&mut self) -> Result<(), AgentError> {
        self.conversation.clear();
        self.tools.clear();
        self.tools_description.clear();
        self.initialized = false;
        self.behavior.cleanup().await
    }

    async fn respond(&self, history: &[Message]) -> Result<String, AgentError> {
        let system = self.system_message();
        let response = self
            .model
            .complete(&system, history, &self.config.model_options)
            .await?;
        debug!(agent = self.behavior.name(), response = %response.text, "model responded");
        Ok(response.text)
    }

    async fn run_tool(&self, call: &ToolCall) -> ToolOutcome {
        if !self.tools.iter().any(|tool| tool.name == call.tool) {
            warn!(agent = self.behavior.name(), tool = %call.tool, "model requested unknown tool");
            return ToolOutcome::Failed(AgentError::UnknownTool(call.tool.clone()).to_string());
        }
        match self.behavior.execute_tool(call).await {
            Ok(text) => ToolOutcome::Completed(text),
            Err(err) => {
                error!(agent = self.behavior.name(), tool = %call.tool, error = %err, "tool execution failed");
                ToolOutcome::Failed(err.to_string())
            }
        }
    }

    fn warn_if_exhausted(&self, iterations: usize, response: &str) {
        if iterations >= self.config.max_tool_iterations && ToolCall::parse(response).is_some() {
            warn!(
                agent = self.behavior.name(),
                max = self.config.max_tool_iterations,
                "reached maximum tool iterations"
            );
        }
    }
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language_model::Role;
    use crate::testing::ScriptedModel;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoBehavior {
        executions: AtomicUsize,
        fail_with: Option<String>,
    }

    impl EchoBehavior {
        fn new() -> Self {
            Self {
                executions: AtomicUsize::new(0),
                fail_with: None,
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                executions: AtomicUsize::new(0),
                fail_with: Some(message.to_string()),
            }
        }
    }

    #[async_trait]
    impl AgentBehavior for EchoBehavior {
        fn name(&self) -> &str {
            "echo"
        }

        fn system_prompt(&self, tools_description: &str) -> String {
            format!("You can use these tools:\n{tools_description}")
        }

        async fn tools(&self) -> Result<Vec<ToolDescriptor>, AgentError> {
            Ok(vec![ToolDescriptor::new(
                "echo",
                "Echo the text argument",
                json!({
                    "properties": { "text": { "description": "Text to echo" } },
                    "required": ["text"]
                }),
            )])
        }

        async fn execute_tool(&self, call: &ToolCall) -> Result<String, AgentError> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.fail_with {
                return Err(AgentError::ToolExecution(message.clone()));
            }
            Ok(call.argument_str("text").unwrap_or_default().to_string())
        }
    }

    fn echo_call(text: &str) -> String {
        json!({ "tool": "echo", "arguments": { "text": text } }).to_string()
    }

    fn agent_with(
        behavior: EchoBehavior,
        responses: Vec<String>,
        config: AgentConfig,
    ) -> (Agent<EchoBehavior>, Arc<ScriptedModel>) {
        let model = ScriptedModel::new(responses);
        (Agent::new(behavior, model.clone(), config), model)
    }

    #[tokio::test]
    async fn plain_answer_returns_unchanged_without_tools() {
        let (mut agent, model) = agent_with(
            EchoBehavior::new(),
            vec!["Hello there".into()],
            AgentConfig::default(),
        );

        let reply = agent.process("hi").await.expect("process should succeed");

        assert_eq!(reply, "Hello there");
        assert_eq!(agent.behavior().executions.load(Ordering::SeqCst), 0);
        assert_eq!(model.call_count().await, 1);
        assert_eq!(agent.conversation().len(), 2);
    }

    #[tokio::test]
    async fn chained_tool_calls_execute_in_order() {
        let (mut agent, model) = agent_with(
            EchoBehavior::new(),
            vec![
                echo_call("one"),
                echo_call("two"),
                echo_call("three"),
                "All done".into(),
            ],
            AgentConfig::default(),
        );

        let reply = agent.process("run three").await.expect("process");

        assert_eq!(reply, "All done");
        assert_eq!(agent.behavior().executions.load(Ordering::SeqCst), 3);
        let requests = model.requests().await;
        let last = requests.last().expect("requests recorded");
        let tool_messages: Vec<_> = last
            .history
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(
            tool_messages,
            vec![
                "Tool execution result: one",
                "Tool execution result: two",
                "Tool execution result: three"
            ]
        );
    }

    #[tokio::test]
    async fn stops_at_iteration_ceiling_without_error() {
        let config = AgentConfig {
            max_tool_iterations: 2,
            ..AgentConfig::default()
        };
        let (mut agent, model) = agent_with(
            EchoBehavior::new(),
            vec![echo_call("a"), echo_call("b"), echo_call("c"), echo_call("d")],
            config,
        );

        let reply = agent.process("loop forever").await.expect("soft stop");

        assert_eq!(reply, echo_call("c"));
        assert_eq!(agent.behavior().executions.load(Ordering::SeqCst), 2);
        assert_eq!(model.call_count().await, 3);
    }

    #[tokio::test]
    async fn system_prompt_is_fresh_and_never_stored() {
        let (mut agent, model) =
            agent_with(EchoBehavior::new(), vec!["ok".into()], AgentConfig::default());

        agent.process("hi").await.expect("process");

        let requests = model.requests().await;
        assert!(requests[0].system.content.contains("Tool: echo"));
        assert!(agent
            .conversation()
            .iter()
            .all(|message| message.role != Role::System));
    }

    #[tokio::test]
    async fn tool_failures_feed_back_as_error_messages() {
        let (mut agent, model) = agent_with(
            EchoBehavior::failing("browser crashed"),
            vec![echo_call("x"), "I could not do that".into()],
            AgentConfig::default(),
        );

        let reply = agent.process("try").await.expect("loop keeps going");

        assert_eq!(reply, "I could not do that");
        let requests = model.requests().await;
        let feedback = &requests[1].history[2];
        assert_eq!(feedback.role, Role::System);
        assert_eq!(feedback.content, "Error executing tool: browser crashed");
    }

    #[tokio::test]
    async fn unknown_tools_are_reported_not_executed() {
        let unknown = json!({ "tool": "teleport", "arguments": {} }).to_string();
        let (mut agent, model) = agent_with(
            EchoBehavior::new(),
            vec![unknown, "Sorry".into()],
            AgentConfig::default(),
        );

        agent.process("go").await.expect("process");

        assert_eq!(agent.behavior().executions.load(Ordering::SeqCst), 0);
        let requests = model.requests().await;
        assert_eq!(
            requests[1].history[2].content,
            "Error executing tool: unknown tool: teleport"
        );
    }

    #[tokio::test]
    async fn process_task_is_single_turn_and_returns_context() {
        let config = AgentConfig {
            tool_result_limit: 10,
            ..AgentConfig::default()
        };
        let long_text = "x".repeat(40);
        let (mut agent, model) = agent_with(
            EchoBehavior::new(),
            vec![echo_call(&long_text), "Echoed".into()],
            config,
        );

        let result = agent.process_task("echo a lot").await.expect("task");

        assert_eq!(result.final_text, "Echoed");
        assert_eq!(result.last_tool_context, long_text);
        assert!(agent.conversation().is_empty());
        let requests = model.requests().await;
        assert_eq!(requests[1].history.len(), 2);
        assert_eq!(requests[1].history[0].content, "echo a lot");
        assert_eq!(requests[1].history[1].content, "Tool execu");
    }

    #[tokio::test]
    async fn failed_tool_calls_do_not_replace_task_context() {
        let unknown = json!({ "tool": "teleport", "arguments": {} }).to_string();
        let (mut agent, _model) = agent_with(
            EchoBehavior::new(),
            vec![echo_call("page snapshot"), unknown, "Done".into()],
            AgentConfig::default(),
        );

        let result = agent.process_task("look around").await.expect("task");

        assert_eq!(result.final_text, "Done");
        assert_eq!(result.last_tool_context, "page snapshot");

        let (mut agent, _model) = agent_with(
            EchoBehavior::failing("browser crashed"),
            vec![echo_call("x"), "Gave up".into()],
            AgentConfig::default(),
        );
        let result = agent.process_task("try").await.expect("task");
        assert!(result.last_tool_context.is_empty());
    }

    #[tokio::test]
    async fn cleanup_resets_state_and_allows_reinitialize() {
        let (mut agent, _model) = agent_with(
            EchoBehavior::new(),
            vec!["first".into(), "second".into()],
            AgentConfig::default(),
        );

        agent.process("one").await.expect("first turn");
        assert!(agent.is_initialized());
        agent.cleanup().await.expect("cleanup");
        agent.cleanup().await.expect("cleanup is repeatable");
        assert!(!agent.is_initialized());
        assert!(agent.conversation().is_empty());
        assert!(agent.tools().is_empty());

        agent.process("two").await.expect("second turn");
        assert_eq!(agent.tools().len(), 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
