use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ai_agent::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::McpServerConfig;
use crate::error::ConnectionError;
use crate::session::{McpConnector, McpSession, SessionConnector, ToolOutput};

pub const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Uninitialized,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Total attempts, including the first.
    pub retries: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

struct ConnectionSlot {
    session: Option<Arc<dyn McpSession>>,
    state: ConnectionState,
    tools: Option<Vec<ToolDescriptor>>,
    /// Last list the server returned; survives recovery, cleared by cleanup.
    declared: Vec<ToolDescriptor>,
    generation: u64,
}

/// Lifecycle manager for one configured tool server.
///
/// The session handle lives behind an async mutex. Calls clone the handle
/// out of the slot, so [`ToolServerConnection::cleanup`] can drop it while a
/// call finishes against its own reference.
pub struct ToolServerConnection {
    name: String,
    config: McpServerConfig,
    connector: Arc<dyn SessionConnector>,
    initialize_timeout: Duration,
    slot: Mutex<ConnectionSlot>,
    recoveries: AtomicU64,
}

impl ToolServerConnection {
    pub fn new(name: impl Into<String>, config: McpServerConfig) -> Self {
        Self::with_connector(name, config, Arc::new(McpConnector))
    }

    pub fn with_connector(
        name: impl Into<String>,
        config: McpServerConfig,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            connector,
            initialize_timeout: INITIALIZE_TIMEOUT,
            slot: Mutex::new(ConnectionSlot {
                session: None,
                state: ConnectionState::Uninitialized,
                tools: None,
                declared: Vec::new(),
                generation: 0,
            }),
            recoveries: AtomicU64::new(0),
        }
    }

    pub fn with_initialize_timeout(mut self, limit: Duration) -> Self {
        self.initialize_timeout = limit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> ConnectionState {
        self.slot.lock().await.state
    }

    /// Number of cleanup-and-reinitialize cycles run by [`Self::execute`].
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::SeqCst)
    }

    /// Opens the session. Calling it on a ready connection does nothing.
    pub async fn initialize(&self) -> Result<(), ConnectionError> {
        let mut slot = self.slot.lock().await;
        if slot.session.is_some() {
            return Ok(());
        }
        if let Err(err) = self.config.transport(&self.name) {
            slot.state = ConnectionState::Failed;
            return Err(err);
        }

        info!(target: "mcp_client", server = %self.name, "connecting to MCP server");
        let connected = timeout(
            self.initialize_timeout,
            self.connector.connect(&self.name, &self.config),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ConnectionError::Timeout {
                server: self.name.clone(),
                operation: "initialize".to_string(),
                after: self.initialize_timeout,
            })
        });

        match connected {
            Ok(session) => {
                slot.session = Some(session);
                slot.state = ConnectionState::Ready;
                slot.generation += 1;
                info!(target: "mcp_client", server = %self.name, "MCP session ready");
                Ok(())
            }
            Err(err) => {
                slot.state = ConnectionState::Failed;
                warn!(target: "mcp_client", server = %self.name, error = %err, "failed to initialise MCP session");
                Err(err)
            }
        }
    }

    /// Tool descriptors, fetched from the server once per session.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ConnectionError> {
        let (session, generation) = {
            let slot = self.slot.lock().await;
            if let Some(tools) = &slot.tools {
                return Ok(tools.clone());
            }
            let session = slot
                .session
                .clone()
                .ok_or_else(|| ConnectionError::SessionNotInitialized(self.name.clone()))?;
            (session, slot.generation)
        };

        debug!(target: "mcp_client", server = %self.name, "fetching tool list");
        let tools = session.list_tools().await?;

        let mut slot = self.slot.lock().await;
        if slot.generation == generation && slot.session.is_some() {
            slot.tools = Some(tools.clone());
            slot.declared = tools.clone();
        }
        Ok(tools)
    }

    /// Whether the server declares `name`. While a failed recovery has left
    /// no session, the answer comes from the last list the server returned.
    pub async fn has_tool(&self, name: &str) -> Result<bool, ConnectionError> {
        match self.list_tools().await {
            Ok(tools) => Ok(tools.iter().any(|tool| tool.name == name)),
            Err(err) => {
                let slot = self.slot.lock().await;
                if slot.declared.is_empty() {
                    return Err(err);
                }
                debug!(target: "mcp_client", server = %self.name, error = %err, "answering from declared tools");
                Ok(slot.declared.iter().any(|tool| tool.name == name))
            }
        }
    }

    /// Calls `name`, reconnecting after every failed attempt.
    ///
    /// A tool that runs and reports failure is returned as
    /// [`ConnectionError::ToolExecution`] without reconnecting.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        options: &ExecuteOptions,
    ) -> Result<ToolOutput, ConnectionError> {
        let state = {
            let slot = self.slot.lock().await;
            slot.session.is_none().then_some(slot.state)
        };
        match state {
            Some(ConnectionState::Uninitialized) => {
                return Err(ConnectionError::SessionNotInitialized(self.name.clone()));
            }
            // An earlier recovery could not reconnect.
            Some(_) => {
                info!(target: "mcp_client", server = %self.name, tool = name, "reconnecting failed session before call");
                self.recoveries.fetch_add(1, Ordering::SeqCst);
                self.initialize().await?;
            }
            None => {}
        }

        let attempts = options.retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(target: "mcp_client", server = %self.name, tool = name, attempt, "executing tool");

            let err = match self.attempt(name, arguments, options.timeout).await {
                Ok(output) if output.is_error => {
                    return Err(ConnectionError::ToolExecution {
                        tool: name.to_string(),
                        reason: output.render(),
                    });
                }
                Ok(output) => return Ok(output),
                Err(err) if !err.is_recoverable() => return Err(err),
                Err(err) => err,
            };

            warn!(
                target: "mcp_client",
                server = %self.name,
                tool = name,
                attempt,
                error = %err,
                "tool call failed, recovering session"
            );
            self.recover().await;

            if attempt >= attempts {
                error!(target: "mcp_client", server = %self.name, tool = name, "giving up after {attempt} attempts");
                return Err(err);
            }
            sleep(options.delay).await;
        }
    }

    /// Drops the session and the tool cache. Safe to repeat and to race.
    pub async fn cleanup(&self) -> Result<(), ConnectionError> {
        self.teardown(true).await
    }

    async fn teardown(&self, forget_declared: bool) -> Result<(), ConnectionError> {
        let mut slot = self.slot.lock().await;
        slot.tools = None;
        if forget_declared {
            slot.declared.clear();
        }
        slot.state = ConnectionState::Uninitialized;
        let Some(session) = slot.session.take() else {
            return Ok(());
        };

        match session.close().await {
            Ok(()) => {
                info!(target: "mcp_client", server = %self.name, "MCP session closed");
                Ok(())
            }
            Err(ConnectionError::TornDown(_)) => {
                debug!(target: "mcp_client", server = %self.name, "session closed under an in-flight request");
                Ok(())
            }
            Err(err) => {
                warn!(target: "mcp_client", server = %self.name, error = %err, "error closing MCP session");
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        limit: Duration,
    ) -> Result<ToolOutput, ConnectionError> {
        let session = self
            .slot
            .lock()
            .await
            .session
            .clone()
            .ok_or_else(|| ConnectionError::SessionNotInitialized(self.name.clone()))?;

        match timeout(limit, session.call_tool(name, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout {
                server: self.name.clone(),
                operation: format!("tools/call {name}"),
                after: limit,
            }),
        }
    }

    async fn recover(&self) {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.teardown(false).await {
            warn!(target: "mcp_client", server = %self.name, error = %err, "cleanup during recovery failed");
        }
        if let Err(err) = self.initialize().await {
            warn!(target: "mcp_client", server = %self.name, error = %err, "reinitialise during recovery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConnector;
    use serde_json::json;

    fn quick() -> ExecuteOptions {
        ExecuteOptions {
            retries: 2,
            delay: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    fn navigate_args() -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("url".into(), json!("https://github.com"));
        args
    }

    fn connection(connector: &Arc<ScriptedConnector>) -> ToolServerConnection {
        ToolServerConnection::with_connector(
            "playwright",
            McpServerConfig::stdio("npx", vec!["@playwright/mcp@latest".into()]),
            connector.clone(),
        )
    }

    fn flaky() -> ConnectionError {
        ConnectionError::transport("playwright", "broken pipe")
    }

    #[tokio::test]
    async fn rejects_unconfigured_server_before_connecting() {
        let connector = ScriptedConnector::browser();
        let conn = ToolServerConnection::with_connector(
            "empty",
            McpServerConfig::default(),
            connector.clone(),
        );

        let err = conn.initialize().await.expect_err("config error");

        assert!(matches!(err, ConnectionError::Configuration { .. }));
        assert_eq!(connector.connects(), 0);
        assert_eq!(conn.state().await, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn requires_initialize_before_use() {
        let connector = ScriptedConnector::browser();
        let conn = connection(&connector);

        assert!(matches!(
            conn.list_tools().await,
            Err(ConnectionError::SessionNotInitialized(_))
        ));
        assert!(matches!(
            conn.execute("browser_navigate", &navigate_args(), &quick()).await,
            Err(ConnectionError::SessionNotInitialized(_))
        ));
        assert_eq!(connector.calls().await.len(), 0);
    }

    #[tokio::test]
    async fn caches_tool_list_until_cleanup() {
        let connector = ScriptedConnector::browser();
        let conn = connection(&connector);
        conn.initialize().await.expect("initialize");
        conn.initialize().await.expect("initialize is idempotent");
        assert_eq!(connector.connects(), 1);

        let first = conn.list_tools().await.expect("tools");
        let second = conn.list_tools().await.expect("tools");
        assert_eq!(first, second);
        assert_eq!(connector.tool_lists(), 1);

        conn.cleanup().await.expect("cleanup");
        conn.initialize().await.expect("reinitialize");
        conn.list_tools().await.expect("tools");
        assert_eq!(connector.tool_lists(), 2);
    }

    #[tokio::test]
    async fn retry_recovers_once_then_succeeds() {
        let connector = ScriptedConnector::browser();
        connector.push_result(Err(flaky())).await;
        connector
            .push_result(Ok(ToolOutput::text("Navigated to https://github.com")))
            .await;
        let conn = connection(&connector);
        conn.initialize().await.expect("initialize");

        let output = conn
            .execute("browser_navigate", &navigate_args(), &quick())
            .await
            .expect("second attempt succeeds");

        assert_eq!(output.render(), "Navigated to https://github.com");
        assert_eq!(conn.recoveries(), 1);
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.closes(), 1);
        assert_eq!(connector.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_propagate_and_leave_connection_usable() {
        let connector = ScriptedConnector::browser();
        connector.push_result(Err(flaky())).await;
        connector.push_result(Err(flaky())).await;
        let conn = connection(&connector);
        conn.initialize().await.expect("initialize");

        let err = conn
            .execute("browser_navigate", &navigate_args(), &quick())
            .await
            .expect_err("both attempts fail");

        assert!(matches!(err, ConnectionError::Transport { .. }));
        assert_eq!(connector.calls().await.len(), 2);
        conn.initialize().await.expect("initialize after exhaustion");
        assert_eq!(conn.state().await, ConnectionState::Ready);
        let output = conn
            .execute("browser_navigate", &navigate_args(), &quick())
            .await
            .expect("default scripted reply");
        assert!(!output.is_error);
    }

    #[tokio::test]
    async fn slow_calls_time_out_and_count_as_failures() {
        let connector = ScriptedConnector::browser();
        connector.set_call_delay(Duration::from_millis(500));
        let conn = connection(&connector);
        conn.initialize().await.expect("initialize");
        let options = ExecuteOptions {
            timeout: Duration::from_millis(20),
            ..quick()
        };

        let err = conn
            .execute("browser_snapshot", &Map::new(), &options)
            .await
            .expect_err("times out");

        assert!(matches!(err, ConnectionError::Timeout { .. }));
        assert_eq!(conn.recoveries(), 2);
    }

    #[tokio::test]
    async fn tool_reported_failure_is_not_retried() {
        let connector = ScriptedConnector::browser();
        connector
            .push_result(Ok(ToolOutput::error("element not found")))
            .await;
        let conn = connection(&connector);
        conn.initialize().await.expect("initialize");

        let err = conn
            .execute("browser_click", &Map::new(), &quick())
            .await
            .expect_err("tool failure");

        match err {
            ConnectionError::ToolExecution { tool, reason } => {
                assert_eq!(tool, "browser_click");
                assert_eq!(reason, "element not found");
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(conn.recoveries(), 0);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn concurrent_cleanup_closes_once() {
        let connector = ScriptedConnector::browser();
        let conn = connection(&connector);
        conn.initialize().await.expect("initialize");

        let (a, b) = tokio::join!(conn.cleanup(), conn.cleanup());

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(connector.closes(), 1);
        assert_eq!(conn.state().await, ConnectionState::Uninitialized);
    }

    #[tokio::test]
    async fn cleanup_suppresses_only_the_teardown_race() {
        let connector = ScriptedConnector::browser();
        let conn = connection(&connector);

        conn.initialize().await.expect("initialize");
        connector
            .fail_next_close(ConnectionError::TornDown("playwright".into()))
            .await;
        conn.cleanup().await.expect("teardown race is benign");

        conn.initialize().await.expect("initialize");
        connector.fail_next_close(flaky()).await;
        let err = conn.cleanup().await.expect_err("other errors surface");
        assert!(matches!(err, ConnectionError::Transport { .. }));
    }

    #[tokio::test]
    async fn failed_reconnect_is_retried_by_the_next_call() {
        let connector = ScriptedConnector::browser();
        connector.push_result(Err(flaky())).await;
        let conn = connection(&connector);
        conn.initialize().await.expect("initialize");
        conn.list_tools().await.expect("tools");
        let single = ExecuteOptions {
            retries: 1,
            ..quick()
        };

        connector.fail_next_connects(1);
        let err = conn
            .execute("browser_navigate", &navigate_args(), &single)
            .await
            .expect_err("call and reconnect both fail");
        assert!(matches!(err, ConnectionError::Transport { .. }));
        assert_eq!(conn.state().await, ConnectionState::Failed);
        assert!(conn
            .has_tool("browser_navigate")
            .await
            .expect("declared tools outlive the failed recovery"));
        assert!(!conn.has_tool("browser_fly").await.expect("declared tools"));

        let output = conn
            .execute("browser_navigate", &navigate_args(), &single)
            .await
            .expect("next call reconnects");
        assert_eq!(output.render(), "browser_navigate ok");
        assert_eq!(conn.state().await, ConnectionState::Ready);
        assert_eq!(connector.connects(), 2);

        conn.cleanup().await.expect("cleanup");
        assert!(matches!(
            conn.has_tool("browser_navigate").await,
            Err(ConnectionError::SessionNotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn cleanup_while_call_in_flight_lets_the_call_finish() {
        let connector = ScriptedConnector::browser();
        connector.set_call_delay(Duration::from_millis(100));
        let conn = Arc::new(connection(&connector));
        conn.initialize().await.expect("initialize");
        let options = ExecuteOptions {
            timeout: Duration::from_secs(2),
            ..quick()
        };

        let running = tokio::spawn({
            let conn = conn.clone();
            async move { conn.execute("browser_snapshot", &Map::new(), &options).await }
        });
        while connector.calls().await.is_empty() {
            tokio::task::yield_now().await;
        }

        conn.cleanup().await.expect("cleanup with a call pending");
        assert_eq!(conn.state().await, ConnectionState::Uninitialized);

        let output = running
            .await
            .expect("execute task")
            .expect("call completes on its own session");
        assert_eq!(output.render(), "browser_snapshot ok");
        assert_eq!(connector.closes(), 1);
        assert_eq!(conn.recoveries(), 0);
    }

    #[tokio::test]
    async fn slow_handshake_fails_initialize() {
        let connector = ScriptedConnector::browser();
        connector.set_connect_delay(Duration::from_millis(500));
        let conn = connection(&connector).with_initialize_timeout(Duration::from_millis(20));

        let err = conn.initialize().await.expect_err("handshake times out");

        assert!(matches!(err, ConnectionError::Timeout { .. }));
        assert_eq!(conn.state().await, ConnectionState::Failed);
    }
}
