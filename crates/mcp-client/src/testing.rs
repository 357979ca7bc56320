//! Scripted session doubles for exercising connection recovery without a
//! real tool server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ai_agent::ToolDescriptor;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::config::McpServerConfig;
use crate::error::ConnectionError;
use crate::session::{McpSession, SessionConnector, ToolOutput};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub tool: String,
    pub arguments: Map<String, Value>,
}

#[derive(Default)]
struct ScriptedState {
    tools: Vec<ToolDescriptor>,
    results: Mutex<VecDeque<Result<ToolOutput, ConnectionError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    close_error: Mutex<Option<ConnectionError>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    tool_lists: AtomicUsize,
    failing_connects: AtomicUsize,
    call_delay: std::sync::Mutex<Duration>,
    connect_delay: std::sync::Mutex<Duration>,
}

/// Hands out sessions backed by one shared script. Results are consumed in
/// order across reconnects; once exhausted every call answers `"{tool} ok"`.
pub struct ScriptedConnector {
    state: Arc<ScriptedState>,
}

impl ScriptedConnector {
    pub fn new(tools: Vec<ToolDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(ScriptedState {
                tools,
                ..ScriptedState::default()
            }),
        })
    }

    /// A connector advertising a small browser automation tool set.
    pub fn browser() -> Arc<Self> {
        Self::new(vec![
            ToolDescriptor::new(
                "browser_navigate",
                "Navigate to a URL",
                json!({
                    "type": "object",
                    "properties": {"url": {"type": "string", "description": "The URL to navigate to"}},
                    "required": ["url"]
                }),
            ),
            ToolDescriptor::new(
                "browser_snapshot",
                "Capture accessibility snapshot of the current page",
                json!({"type": "object", "properties": {}}),
            ),
            ToolDescriptor::new(
                "browser_click",
                "Perform click on a web page",
                json!({
                    "type": "object",
                    "properties": {
                        "element": {"type": "string", "description": "Human-readable element description"},
                        "ref": {"type": "string", "description": "Exact target element reference"}
                    },
                    "required": ["element", "ref"]
                }),
            ),
        ])
    }

    pub async fn push_result(&self, result: Result<ToolOutput, ConnectionError>) {
        self.state.results.lock().await.push_back(result);
    }

    pub async fn fail_next_close(&self, err: ConnectionError) {
        *self.state.close_error.lock().await = Some(err);
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.state.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn set_call_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.state.call_delay.lock() {
            *slot = delay;
        }
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.state.connect_delay.lock() {
            *slot = delay;
        }
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().await.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn tool_lists(&self) -> usize {
        self.state.tool_lists.load(Ordering::SeqCst)
    }
}

fn read_delay(slot: &std::sync::Mutex<Duration>) -> Duration {
    slot.lock().map(|delay| *delay).unwrap_or_default()
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(
        &self,
        server: &str,
        _config: &McpServerConfig,
    ) -> Result<Arc<dyn McpSession>, ConnectionError> {
        let delay = read_delay(&self.state.connect_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self.state.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(ConnectionError::transport(server, "connection refused"));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession {
            state: self.state.clone(),
        }))
    }
}

pub struct ScriptedSession {
    state: Arc<ScriptedState>,
}

#[async_trait]
impl McpSession for ScriptedSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ConnectionError> {
        self.state.tool_lists.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolOutput, ConnectionError> {
        self.state.calls.lock().await.push(RecordedCall {
            tool: name.to_string(),
            arguments: arguments.clone(),
        });
        let delay = read_delay(&self.state.call_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.state.results.lock().await.pop_front();
        scripted.unwrap_or_else(|| Ok(ToolOutput::text(format!("{name} ok"))))
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        match self.state.close_error.lock().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
