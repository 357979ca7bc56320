//! Client side of the Model Context Protocol.
//!
//! [`ToolServerConnection`] owns the lifecycle of one configured server:
//! it opens a session over stdio or streamable HTTP, caches the advertised
//! tools, and reconnects between retries when a call fails.

pub mod config;
pub mod connection;
pub mod error;
mod http;
pub mod rpc;
pub mod session;
mod stdio;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{McpServerConfig, McpTransport};
pub use connection::{ConnectionState, ExecuteOptions, ToolServerConnection, INITIALIZE_TIMEOUT};
pub use error::ConnectionError;
pub use session::{McpConnector, McpSession, SessionConnector, ToolOutput};
