use ai_agent::{AgentBehavior, AgentError, ToolCall, ToolDescriptor};
use async_trait::async_trait;
use tracing::info;

use super::TOOL_CALL_FORMAT;
use crate::dispatcher::Dispatcher;

const NAVIGATION_EXAMPLES: &str = r#"EXAMPLES:

Input: Navigate to github.com
Output: {
    "tool": "browser_navigate",
    "arguments": {
        "url": "https://github.com"
    }
}

Input: Click on sign in link
Output: {
    "tool": "browser_click",
    "arguments": {
        "element": "Sign in link",
        "ref": "e70"
    }
}

Input: Find username input box on the page
Output: {
    "tool": "browser_snapshot",
    "arguments": {}
}

Input: Slowly fill in username as vasiliy@live.com into username input box
Output: {
    "tool": "browser_type",
    "arguments": {
        "element": "Username input box",
        "ref": "e60",
        "text": "vasiliy@live.com"
    }
}
"#;

/// Drives the browser through the configured MCP servers and reports back
/// with a one-line confirmation.
pub struct NavigationAgent {
    servers: Dispatcher,
}

impl NavigationAgent {
    pub fn new(servers: Dispatcher) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl AgentBehavior for NavigationAgent {
    fn name(&self) -> &str {
        "navigation"
    }

    fn system_prompt(&self, tools_description: &str) -> String {
        format!(
            "You are a browser automation assistant. Your ONLY job is to execute commands and confirm completion.\n\
             CRITICAL RULES:\n\
             - Execute the requested action using the appropriate tool\n\
             - Respond with ONLY a brief confirmation (e.g., 'Navigated to github.com' or 'Error: [description]')\n\
             - DO NOT analyze, summarize, or describe page content\n\
             - DO NOT provide additional commentary unless explicitly asked\n\
             You have access to these tools:\n\n\
             {tools_description}\n\
             {TOOL_CALL_FORMAT}\
             {NAVIGATION_EXAMPLES}\n\
             Please use only the tools that are explicitly defined above."
        )
    }

    async fn tools(&self) -> Result<Vec<ToolDescriptor>, AgentError> {
        self.servers.tools().await
    }

    async fn execute_tool(&self, call: &ToolCall) -> Result<String, AgentError> {
        self.servers.dispatch(call).await
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        self.servers.initialize().await?;
        info!(servers = ?self.servers.route_names(), "navigation servers connected");
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        self.servers.cleanup().await
    }
}
