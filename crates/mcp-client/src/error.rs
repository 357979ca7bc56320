use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to an MCP tool server.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The server entry sets neither or both of `command` and `url`.
    #[error("invalid configuration for MCP server `{server}`: {reason}")]
    Configuration { server: String, reason: String },
    /// No live session; `initialize` never ran or the session was torn down.
    #[error("MCP server `{0}` is not initialized")]
    SessionNotInitialized(String),
    #[error("MCP server `{server}` timed out after {after:?} during {operation}")]
    Timeout {
        server: String,
        operation: String,
        after: Duration,
    },
    #[error("transport to MCP server `{server}` failed: {reason}")]
    Transport { server: String, reason: String },
    /// The server answered with a JSON-RPC error or an undecodable payload.
    #[error("MCP server `{server}` returned an error: {reason}")]
    Protocol { server: String, reason: String },
    /// The tool ran and reported failure.
    #[error("tool `{tool}` reported failure: {reason}")]
    ToolExecution { tool: String, reason: String },
    /// The session was closed while another task was mid-request.
    #[error("MCP server `{0}` was torn down during an in-flight request")]
    TornDown(String),
}

impl ConnectionError {
    pub fn transport(server: &str, reason: impl ToString) -> Self {
        ConnectionError::Transport {
            server: server.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn protocol(server: &str, reason: impl ToString) -> Self {
        ConnectionError::Protocol {
            server: server.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn configuration(server: &str, reason: impl ToString) -> Self {
        ConnectionError::Configuration {
            server: server.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether reconnecting could plausibly fix the failure.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ConnectionError::Configuration { .. } | ConnectionError::ToolExecution { .. }
        )
    }
}
