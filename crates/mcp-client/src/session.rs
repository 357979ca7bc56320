use std::sync::Arc;

use ai_agent::ToolDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::{McpServerConfig, McpTransport};
use crate::error::ConnectionError;
use crate::http::HttpChannel;
use crate::rpc;
use crate::stdio::StdioChannel;

/// Result of a `tools/call`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![json!({ "type": "text", "text": text.into() })],
            ..Self::default()
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(text)
        }
    }

    /// Flattens the content blocks into the text handed back to the model.
    /// Text blocks contribute their text, everything else its JSON form.
    pub fn render(&self) -> String {
        let parts: Vec<String> = self
            .content
            .iter()
            .map(|item| match item.get("text").and_then(Value::as_str) {
                Some(text) if item.get("type").and_then(Value::as_str) == Some("text") => {
                    text.to_string()
                }
                _ => item.to_string(),
            })
            .collect();
        if parts.is_empty() {
            return self
                .structured_content
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_default();
        }
        parts.join("\n")
    }
}

/// A live, handshaken session with one tool server.
#[async_trait]
pub trait McpSession: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ConnectionError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolOutput, ConnectionError>;

    async fn close(&self) -> Result<(), ConnectionError>;
}

/// Opens sessions; [`crate::ToolServerConnection`] calls it again on every
/// recovery.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        server: &str,
        config: &McpServerConfig,
    ) -> Result<Arc<dyn McpSession>, ConnectionError>;
}

/// Request/response plumbing underneath a session.
#[async_trait]
pub(crate) trait JsonRpcChannel: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ConnectionError>;

    async fn notify(&self, method: &str, params: Value) -> Result<(), ConnectionError>;

    async fn shutdown(&self) -> Result<(), ConnectionError>;
}

pub(crate) struct RpcSession<C> {
    server: String,
    channel: C,
}

impl<C: JsonRpcChannel> RpcSession<C> {
    pub(crate) async fn handshake(server: &str, channel: C) -> Result<Self, ConnectionError> {
        let result = channel
            .request("initialize", rpc::initialize_params())
            .await?;
        let protocol = result
            .get("protocolVersion")
            .cloned()
            .unwrap_or(Value::Null);
        debug!(target: "mcp_client", server, protocol = %protocol, "MCP handshake complete");
        channel
            .notify("notifications/initialized", json!({}))
            .await?;
        Ok(Self {
            server: server.to_string(),
            channel,
        })
    }
}

#[async_trait]
impl<C: JsonRpcChannel> McpSession for RpcSession<C> {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ConnectionError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let result = self
                .channel
                .request("tools/list", rpc::list_params(cursor.as_deref()))
                .await?;
            let (page, next) = rpc::decode_tool_page(result, &self.server)?;
            tools.extend(page);
            match next {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolOutput, ConnectionError> {
        let result = self
            .channel
            .request("tools/call", rpc::call_params(name, arguments))
            .await?;
        rpc::decode_tool_output(result, &self.server)
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.channel.shutdown().await
    }
}

/// Default connector: spawns stdio servers or talks streamable HTTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct McpConnector;

#[async_trait]
impl SessionConnector for McpConnector {
    async fn connect(
        &self,
        server: &str,
        config: &McpServerConfig,
    ) -> Result<Arc<dyn McpSession>, ConnectionError> {
        let timeout = config.request_timeout();
        let session: Arc<dyn McpSession> = match config.transport(server)? {
            McpTransport::Stdio { program, args, env } => {
                let channel = StdioChannel::spawn(server, &program, &args, &env, timeout)?;
                Arc::new(RpcSession::handshake(server, channel).await?)
            }
            McpTransport::Http { url, headers } => {
                let channel = HttpChannel::new(server, url, headers, timeout)?;
                Arc::new(RpcSession::handshake(server, channel).await?)
            }
        };
        Ok(session)
    }
}
