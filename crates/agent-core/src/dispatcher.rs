use std::sync::Arc;

use ai_agent::{Agent, AgentError, ToolCall, ToolDescriptor};
use async_trait::async_trait;
use mcp_client::{ExecuteOptions, ToolServerConnection};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agents::{NavigationAgent, PageAnalysisAgent};

pub const BROWSE_WEB_TOOL: &str = "browse_web";
pub const ANALYZE_PAGE_TOOL: &str = "analyze_page";

/// What the browser last showed: the raw result of the most recent
/// navigation tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageContext {
    content: String,
}

impl PageContext {
    pub fn as_str(&self) -> &str {
        &self.content
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn replace(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }
}

/// A source of tools the dispatcher can hand calls to.
#[async_trait]
pub trait ToolRoute: Send + Sync {
    fn name(&self) -> &str;

    async fn tools(&self) -> Result<Vec<ToolDescriptor>, AgentError>;

    async fn owns(&self, tool: &str) -> bool;

    async fn execute(&self, call: &ToolCall, page: &mut PageContext)
        -> Result<String, AgentError>;

    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Ordered set of routes. The first route owning a tool handles its calls.
pub struct Dispatcher {
    routes: Vec<Box<dyn ToolRoute>>,
    page: Mutex<PageContext>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            page: Mutex::new(PageContext::default()),
        }
    }

    pub fn with_route(mut self, route: impl ToolRoute + 'static) -> Self {
        self.routes.push(Box::new(route));
        self
    }

    pub fn push(&mut self, route: Box<dyn ToolRoute>) {
        self.routes.push(route);
    }

    pub fn route_names(&self) -> Vec<&str> {
        self.routes.iter().map(|route| route.name()).collect()
    }

    pub async fn page_context(&self) -> PageContext {
        self.page.lock().await.clone()
    }

    pub async fn tools(&self) -> Result<Vec<ToolDescriptor>, AgentError> {
        let mut tools = Vec::new();
        for route in &self.routes {
            tools.extend(route.tools().await?);
        }
        Ok(tools)
    }

    pub async fn dispatch(&self, call: &ToolCall) -> Result<String, AgentError> {
        for route in &self.routes {
            if route.owns(&call.tool).await {
                debug!(route = route.name(), tool = %call.tool, "dispatching tool call");
                let mut page = self.page.lock().await;
                return route.execute(call, &mut page).await;
            }
        }
        Err(AgentError::UnknownTool(call.tool.clone()))
    }

    /// Initializes every route in order, stopping at the first failure.
    pub async fn initialize(&self) -> Result<(), AgentError> {
        for route in &self.routes {
            route.initialize().await?;
        }
        Ok(())
    }

    /// Tears every route down and reports the first failure afterwards.
    pub async fn cleanup(&self) -> Result<(), AgentError> {
        let mut first_error = None;
        for route in &self.routes {
            if let Err(err) = route.cleanup().await {
                warn!(route = route.name(), error = %err, "route cleanup failed");
                first_error.get_or_insert(err);
            }
        }
        self.page.lock().await.replace(String::new());
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Tools served by one MCP server.
pub struct ConnectionRoute {
    connection: Arc<ToolServerConnection>,
    options: ExecuteOptions,
}

impl ConnectionRoute {
    pub fn new(connection: Arc<ToolServerConnection>, options: ExecuteOptions) -> Self {
        Self {
            connection,
            options,
        }
    }

    pub fn connection(&self) -> &Arc<ToolServerConnection> {
        &self.connection
    }
}

#[async_trait]
impl ToolRoute for ConnectionRoute {
    fn name(&self) -> &str {
        self.connection.name()
    }

    async fn tools(&self) -> Result<Vec<ToolDescriptor>, AgentError> {
        self.connection.list_tools().await.map_err(|err| {
            AgentError::Initialization(format!(
                "listing tools on `{}`: {err}",
                self.connection.name()
            ))
        })
    }

    async fn owns(&self, tool: &str) -> bool {
        match self.connection.has_tool(tool).await {
            Ok(owned) => owned,
            Err(err) => {
                warn!(server = self.connection.name(), error = %err, "could not list tools");
                false
            }
        }
    }

    async fn execute(
        &self,
        call: &ToolCall,
        _page: &mut PageContext,
    ) -> Result<String, AgentError> {
        self.connection
            .execute(&call.tool, &call.arguments, &self.options)
            .await
            .map(|output| output.render())
            .map_err(|err| AgentError::ToolExecution(err.to_string()))
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        self.connection.initialize().await.map_err(|err| {
            AgentError::Initialization(format!(
                "failed to initialize server `{}`: {err}",
                self.connection.name()
            ))
        })
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        self.connection.cleanup().await.map_err(|err| {
            AgentError::Cleanup(format!("server `{}`: {err}", self.connection.name()))
        })
    }
}

pub fn build_browse_web_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "action": {
                "type": "string",
                "description": "The action to perform, e.g., 'navigate to github.com' or 'click on sign in link'."
            }
        },
        "required": ["action"]
    })
}

pub fn build_analyze_page_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "analysis_type": {
                "type": "string",
                "description": "Type of analysis to perform, e.g., 'find element IDs' or 'inspect page structure'."
            }
        },
        "required": ["analysis_type"]
    })
}

/// Delegates `browse_web` to the navigation sub-agent and records what the
/// browser returned as the new page context.
pub struct NavigationRoute {
    agent: Mutex<Agent<NavigationAgent>>,
    descriptor: ToolDescriptor,
}

impl NavigationRoute {
    pub fn new(agent: Agent<NavigationAgent>) -> Self {
        Self {
            agent: Mutex::new(agent),
            descriptor: ToolDescriptor::new(
                BROWSE_WEB_TOOL,
                "Navigate to a new page or perform actions like clicking on the current page.",
                build_browse_web_schema(),
            ),
        }
    }
}

#[async_trait]
impl ToolRoute for NavigationRoute {
    fn name(&self) -> &str {
        "navigation"
    }

    async fn tools(&self) -> Result<Vec<ToolDescriptor>, AgentError> {
        Ok(vec![self.descriptor.clone()])
    }

    async fn owns(&self, tool: &str) -> bool {
        tool == BROWSE_WEB_TOOL
    }

    async fn execute(&self, call: &ToolCall, page: &mut PageContext) -> Result<String, AgentError> {
        let action = call.argument_str("action").unwrap_or_default();
        let mut agent = self.agent.lock().await;
        agent.reset_conversation();
        let result = agent.process_task(action).await?;
        // Only a successful tool result replaces what the browser showed.
        if !result.last_tool_context.is_empty() {
            page.replace(result.last_tool_context);
            info!(chars = page.as_str().len(), "page context updated");
        }
        Ok(result.final_text)
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        self.agent.lock().await.initialize().await
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        self.agent.lock().await.cleanup().await
    }
}

/// Delegates `analyze_page` to the page-analysis sub-agent, handing it the
/// current page context first.
pub struct PageAnalysisRoute {
    agent: Mutex<Agent<PageAnalysisAgent>>,
    descriptor: ToolDescriptor,
}

impl PageAnalysisRoute {
    pub fn new(agent: Agent<PageAnalysisAgent>) -> Self {
        Self {
            agent: Mutex::new(agent),
            descriptor: ToolDescriptor::new(
                ANALYZE_PAGE_TOOL,
                "Analyze the current page and find IDs of page elements.",
                build_analyze_page_schema(),
            ),
        }
    }
}

#[async_trait]
impl ToolRoute for PageAnalysisRoute {
    fn name(&self) -> &str {
        "page_analysis"
    }

    async fn tools(&self) -> Result<Vec<ToolDescriptor>, AgentError> {
        Ok(vec![self.descriptor.clone()])
    }

    async fn owns(&self, tool: &str) -> bool {
        tool == ANALYZE_PAGE_TOOL
    }

    async fn execute(&self, call: &ToolCall, page: &mut PageContext) -> Result<String, AgentError> {
        let analysis = call.argument_str("analysis_type").unwrap_or_default();
        let mut agent = self.agent.lock().await;
        agent.behavior_mut().set_page_context(page.as_str());
        agent.reset_conversation();
        Ok(agent.process_task(analysis).await?.final_text)
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        self.agent.lock().await.cleanup().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_agent::testing::ScriptedModel;
    use ai_agent::AgentConfig;
    use mcp_client::testing::ScriptedConnector;
    use mcp_client::{ConnectionError, McpServerConfig, ToolOutput};
    use serde_json::Map;
    use std::time::Duration;

    fn call(tool: &str, arguments: Value) -> ToolCall {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ToolCall::new(tool, arguments)
    }

    fn quick_options() -> ExecuteOptions {
        ExecuteOptions {
            retries: 2,
            delay: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        }
    }

    fn browser_connection(connector: &Arc<ScriptedConnector>) -> Arc<ToolServerConnection> {
        Arc::new(ToolServerConnection::with_connector(
            "playwright",
            McpServerConfig::stdio("npx", vec!["@playwright/mcp@latest".into()]),
            connector.clone(),
        ))
    }

    #[tokio::test]
    async fn unowned_tools_are_unknown() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .dispatch(&call("browser_navigate", json!({})))
            .await
            .expect_err("no routes");
        assert!(matches!(err, AgentError::UnknownTool(name) if name == "browser_navigate"));
    }

    #[tokio::test]
    async fn connection_route_executes_and_reports_failures() {
        let connector = ScriptedConnector::browser();
        connector
            .push_result(Ok(ToolOutput::text("Navigated to https://github.com")))
            .await;
        connector
            .push_result(Ok(ToolOutput::error("Ref e70 not found")))
            .await;
        let dispatcher = Dispatcher::new()
            .with_route(ConnectionRoute::new(browser_connection(&connector), quick_options()));
        dispatcher.initialize().await.expect("initialize");

        let tools = dispatcher.tools().await.expect("tools");
        assert_eq!(tools.len(), 3);

        let text = dispatcher
            .dispatch(&call("browser_navigate", json!({"url": "https://github.com"})))
            .await
            .expect("navigate");
        assert_eq!(text, "Navigated to https://github.com");

        let err = dispatcher
            .dispatch(&call("browser_click", json!({"element": "Sign in", "ref": "e70"})))
            .await
            .expect_err("tool failure");
        assert!(matches!(err, AgentError::ToolExecution(reason) if reason.contains("Ref e70")));
    }

    #[tokio::test]
    async fn connection_route_initialize_failure_is_reported() {
        let connector = ScriptedConnector::browser();
        connector.fail_next_connects(1);
        let dispatcher = Dispatcher::new()
            .with_route(ConnectionRoute::new(browser_connection(&connector), quick_options()));

        let err = dispatcher.initialize().await.expect_err("connect refused");
        assert!(matches!(err, AgentError::Initialization(reason) if reason.contains("playwright")));
    }

    #[tokio::test]
    async fn cleanup_surfaces_close_errors_after_visiting_every_route() {
        let first = ScriptedConnector::browser();
        let second = ScriptedConnector::browser();
        let dispatcher = Dispatcher::new()
            .with_route(ConnectionRoute::new(browser_connection(&first), quick_options()))
            .with_route(ConnectionRoute::new(browser_connection(&second), quick_options()));
        dispatcher.initialize().await.expect("initialize");
        first
            .fail_next_close(ConnectionError::transport("playwright", "broken pipe"))
            .await;

        let err = dispatcher.cleanup().await.expect_err("first close fails");

        assert!(matches!(err, AgentError::Cleanup(_)));
        assert_eq!(second.closes(), 1);
    }

    #[tokio::test]
    async fn navigation_updates_page_context_for_analysis() {
        let connector = ScriptedConnector::browser();
        connector
            .push_result(Ok(ToolOutput::text("- heading \"GitHub\" [ref=e12]")))
            .await;
        let model = ScriptedModel::new(vec![
            json!({"tool": "browser_snapshot", "arguments": {}}).to_string(),
            "Captured snapshot".to_string(),
            "The heading ref is e12".to_string(),
        ]);

        let navigation = Agent::new(
            NavigationAgent::new(Dispatcher::new().with_route(ConnectionRoute::new(
                browser_connection(&connector),
                quick_options(),
            ))),
            model.clone(),
            AgentConfig::default(),
        );
        let analysis = Agent::new(PageAnalysisAgent::new(), model.clone(), AgentConfig::default());
        let dispatcher = Dispatcher::new()
            .with_route(NavigationRoute::new(navigation))
            .with_route(PageAnalysisRoute::new(analysis));
        dispatcher.initialize().await.expect("initialize");

        let confirmation = dispatcher
            .dispatch(&call(BROWSE_WEB_TOOL, json!({"action": "find the heading"})))
            .await
            .expect("browse");
        assert_eq!(confirmation, "Captured snapshot");
        assert_eq!(
            dispatcher.page_context().await.as_str(),
            "- heading \"GitHub\" [ref=e12]"
        );

        let answer = dispatcher
            .dispatch(&call(ANALYZE_PAGE_TOOL, json!({"analysis_type": "find element IDs"})))
            .await
            .expect("analyze");
        assert_eq!(answer, "The heading ref is e12");

        let requests = model.requests().await;
        let analysis_prompt = &requests[2].system.content;
        assert!(analysis_prompt.contains("- heading \"GitHub\" [ref=e12]"));
    }

    #[tokio::test]
    async fn failed_browser_action_keeps_the_last_snapshot() {
        let connector = ScriptedConnector::browser();
        connector
            .push_result(Ok(ToolOutput::text("- heading \"GitHub\" [ref=e12]")))
            .await;
        connector
            .push_result(Ok(ToolOutput::error("Ref e99 not found")))
            .await;
        let model = ScriptedModel::new(vec![
            json!({"tool": "browser_snapshot", "arguments": {}}).to_string(),
            "Captured snapshot".to_string(),
            json!({"tool": "browser_click", "arguments": {"element": "Sign in", "ref": "e99"}})
                .to_string(),
            "The click failed".to_string(),
        ]);
        let navigation = Agent::new(
            NavigationAgent::new(Dispatcher::new().with_route(ConnectionRoute::new(
                browser_connection(&connector),
                quick_options(),
            ))),
            model,
            AgentConfig::default(),
        );
        let dispatcher = Dispatcher::new().with_route(NavigationRoute::new(navigation));
        dispatcher.initialize().await.expect("initialize");

        dispatcher
            .dispatch(&call(BROWSE_WEB_TOOL, json!({"action": "take a snapshot"})))
            .await
            .expect("snapshot");
        let reply = dispatcher
            .dispatch(&call(BROWSE_WEB_TOOL, json!({"action": "click sign in"})))
            .await
            .expect("navigation reports the failure in text");

        assert_eq!(reply, "The click failed");
        assert_eq!(
            dispatcher.page_context().await.as_str(),
            "- heading \"GitHub\" [ref=e12]"
        );
    }

    #[tokio::test]
    async fn server_tools_stay_routable_after_a_failed_reconnect() {
        let connector = ScriptedConnector::browser();
        let dispatcher = Dispatcher::new().with_route(ConnectionRoute::new(
            browser_connection(&connector),
            ExecuteOptions {
                retries: 1,
                ..quick_options()
            },
        ));
        dispatcher.initialize().await.expect("initialize");
        dispatcher.tools().await.expect("tools");
        connector
            .push_result(Err(ConnectionError::transport("playwright", "broken pipe")))
            .await;
        connector.fail_next_connects(1);
        let navigate = call("browser_navigate", json!({"url": "https://github.com"}));

        let first = dispatcher.dispatch(&navigate).await.expect_err("broken pipe");
        assert!(matches!(first, AgentError::ToolExecution(reason) if reason.contains("broken pipe")));

        let second = dispatcher.dispatch(&navigate).await.expect("reconnected");
        assert_eq!(second, "browser_navigate ok");
        let third = dispatcher.dispatch(&navigate).await.expect("still connected");
        assert_eq!(third, "browser_navigate ok");
        assert_eq!(connector.connects(), 2);
    }
}
