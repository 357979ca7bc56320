use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One entry of the `mcpServers` map: either a spawned command or a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpTransport {
    Stdio {
        program: String,
        args: Vec<String>,
        env: IndexMap<String, String>,
    },
    Http {
        url: String,
        headers: IndexMap<String, String>,
    },
}

impl McpServerConfig {
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Self::default()
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Time allowed for a single JSON-RPC exchange.
    pub fn request_timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn transport(&self, server: &str) -> Result<McpTransport, ConnectionError> {
        let command = non_empty(&self.command);
        let url = non_empty(&self.url);
        match (command, url) {
            (Some(program), None) => Ok(McpTransport::Stdio {
                program: program.to_string(),
                args: self.args.clone(),
                env: self.env.clone(),
            }),
            (None, Some(url)) => Ok(McpTransport::Http {
                url: url.to_string(),
                headers: self.headers.clone(),
            }),
            (None, None) => Err(ConnectionError::configuration(
                server,
                "either `command` or `url` must be set",
            )),
            (Some(_), Some(_)) => Err(ConnectionError::configuration(
                server,
                "only one of `command` and `url` may be set",
            )),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
