use ai_agent::{AgentBehavior, AgentError, ToolCall, ToolDescriptor};
use async_trait::async_trait;

use super::TOOL_CALL_FORMAT;
use crate::dispatcher::{Dispatcher, PageContext};

/// The coordinator. Its tools are the sub-agents reachable through its
/// dispatcher.
pub struct ConversationAgent {
    dispatcher: Dispatcher,
}

impl ConversationAgent {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn page_context(&self) -> PageContext {
        self.dispatcher.page_context().await
    }
}

#[async_trait]
impl AgentBehavior for ConversationAgent {
    fn name(&self) -> &str {
        "conversation"
    }

    fn system_prompt(&self, tools_description: &str) -> String {
        format!(
            "You are a conversation agent. You can browse the web or analyze the current page. \
             You have access to these tools:\n\n\
             {tools_description}\n\
             {TOOL_CALL_FORMAT}"
        )
    }

    async fn tools(&self) -> Result<Vec<ToolDescriptor>, AgentError> {
        self.dispatcher.tools().await
    }

    async fn execute_tool(&self, call: &ToolCall) -> Result<String, AgentError> {
        self.dispatcher.dispatch(call).await
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        self.dispatcher.initialize().await
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        self.dispatcher.cleanup().await
    }
}
