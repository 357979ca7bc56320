use std::sync::Arc;

use ai_agent::{Agent, AgentConfig, AgentError, AgentResult, LanguageModelClient, Message};
use indexmap::IndexMap;
use mcp_client::{ExecuteOptions, McpServerConfig, ToolServerConnection};
use thiserror::Error;
use tracing::info;

use crate::agents::{ConversationAgent, NavigationAgent, PageAnalysisAgent};
use crate::dispatcher::{ConnectionRoute, Dispatcher, NavigationRoute, PageAnalysisRoute, PageContext};
use crate::planner::{ClarificationPlanner, PlannerError};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Planner(#[from] PlannerError),
}

/// Everything one process needs to answer instructions: the coordinating
/// agent with its sub-agents and connections, plus the planner. Built once
/// at startup and owned by whoever drives it.
pub struct CopilotRuntime {
    coordinator: Agent<ConversationAgent>,
    planner: ClarificationPlanner,
    connections: Vec<Arc<ToolServerConnection>>,
}

impl CopilotRuntime {
    pub fn builder(model: Arc<dyn LanguageModelClient>) -> CopilotRuntimeBuilder {
        CopilotRuntimeBuilder::new(model)
    }

    /// Connects every configured server and freezes the tool lists.
    pub async fn initialize(&mut self) -> Result<(), RuntimeError> {
        self.coordinator.initialize().await?;
        info!(
            servers = self.connections.len(),
            tools = self.coordinator.tools().len(),
            "copilot runtime initialized"
        );
        Ok(())
    }

    /// One chat turn against the coordinator's persistent conversation.
    pub async fn process_message(&mut self, text: &str) -> Result<String, RuntimeError> {
        Ok(self.coordinator.process(text).await?)
    }

    /// A single-turn instruction; earlier chat history is not consulted.
    pub async fn process_task(&mut self, text: &str) -> Result<AgentResult, RuntimeError> {
        Ok(self.coordinator.process_task(text).await?)
    }

    pub fn planner(&mut self) -> &mut ClarificationPlanner {
        &mut self.planner
    }

    pub async fn page_context(&self) -> PageContext {
        self.coordinator.behavior().page_context().await
    }

    pub fn conversation(&self) -> &[Message] {
        self.coordinator.conversation()
    }

    pub fn connections(&self) -> &[Arc<ToolServerConnection>] {
        &self.connections
    }

    pub fn reset_conversation(&mut self) {
        self.coordinator.reset_conversation();
    }

    /// Tears down the agents and their connections. Safe to call again.
    pub async fn shutdown(&mut self) -> Result<(), RuntimeError> {
        self.coordinator.cleanup().await?;
        self.planner.reset();
        info!("copilot runtime shut down");
        Ok(())
    }
}

pub struct CopilotRuntimeBuilder {
    model: Arc<dyn LanguageModelClient>,
    config: AgentConfig,
    execute_options: ExecuteOptions,
    servers: IndexMap<String, McpServerConfig>,
    connections: Vec<Arc<ToolServerConnection>>,
}

impl CopilotRuntimeBuilder {
    fn new(model: Arc<dyn LanguageModelClient>) -> Self {
        Self {
            model,
            config: AgentConfig::default(),
            execute_options: ExecuteOptions::default(),
            servers: IndexMap::new(),
            connections: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_execute_options(mut self, options: ExecuteOptions) -> Self {
        self.execute_options = options;
        self
    }

    pub fn with_server(mut self, name: impl Into<String>, config: McpServerConfig) -> Self {
        self.servers.insert(name.into(), config);
        self
    }

    pub fn with_servers(mut self, servers: IndexMap<String, McpServerConfig>) -> Self {
        self.servers.extend(servers);
        self
    }

    /// Registers an already constructed connection, e.g. one with a custom
    /// session connector.
    pub fn with_connection(mut self, connection: ToolServerConnection) -> Self {
        self.connections.push(Arc::new(connection));
        self
    }

    pub fn build(self) -> CopilotRuntime {
        let mut connections = self.connections;
        connections.extend(
            self.servers
                .into_iter()
                .map(|(name, config)| Arc::new(ToolServerConnection::new(name, config))),
        );

        let mut servers = Dispatcher::new();
        for connection in &connections {
            servers.push(Box::new(ConnectionRoute::new(
                connection.clone(),
                self.execute_options.clone(),
            )));
        }

        let navigation = Agent::new(
            NavigationAgent::new(servers),
            self.model.clone(),
            self.config.clone(),
        );
        let analysis = Agent::new(
            PageAnalysisAgent::new(),
            self.model.clone(),
            self.config.clone(),
        );
        let coordinator = Agent::new(
            ConversationAgent::new(
                Dispatcher::new()
                    .with_route(NavigationRoute::new(navigation))
                    .with_route(PageAnalysisRoute::new(analysis)),
            ),
            self.model.clone(),
            self.config.clone(),
        );

        CopilotRuntime {
            coordinator,
            planner: ClarificationPlanner::new(self.model, self.config),
            connections,
        }
    }
}
