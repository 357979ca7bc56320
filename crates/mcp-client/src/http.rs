use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ConnectionError;
use crate::rpc;
use crate::session::JsonRpcChannel;

const SESSION_HEADER: &str = "mcp-session-id";

/// JSON-RPC over streamable HTTP: one POST per message, answered either with
/// a JSON body or a short server-sent event stream.
pub(crate) struct HttpChannel {
    server: String,
    client: Client,
    url: String,
    headers: IndexMap<String, String>,
    request_timeout: Duration,
    request_id: AtomicU64,
    session_id: RwLock<Option<String>>,
}

impl HttpChannel {
    pub(crate) fn new(
        server: &str,
        url: String,
        headers: IndexMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| {
                ConnectionError::transport(server, format!("building HTTP client: {err}"))
            })?;
        Ok(Self {
            server: server.to_string(),
            client,
            url,
            headers,
            request_timeout,
            request_id: AtomicU64::new(1),
            session_id: RwLock::new(None),
        })
    }

    async fn post(&self, body: &Value, operation: &str) -> Result<Response, ConnectionError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(session_id) = self.session_id.read().await.as_deref() {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                ConnectionError::Timeout {
                    server: self.server.clone(),
                    operation: operation.to_string(),
                    after: self.request_timeout,
                }
            } else {
                ConnectionError::transport(&self.server, err)
            }
        })?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            *self.session_id.write().await = Some(session_id.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ConnectionError::transport(
                &self.server,
                format!("HTTP {status}: {detail}"),
            ));
        }
        Ok(response)
    }

    fn find_response(&self, payload: Value, request_id: u64) -> Option<Value> {
        match payload {
            Value::Array(items) => items
                .into_iter()
                .find(|item| rpc::matches_request(item, request_id)),
            value if rpc::matches_request(&value, request_id) => Some(value),
            _ => None,
        }
    }
}

#[async_trait]
impl JsonRpcChannel for HttpChannel {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ConnectionError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let response = self.post(&rpc::request(id, method, params), method).await?;

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map_or(false, |value| value.starts_with("text/event-stream"));
        let text = response
            .text()
            .await
            .map_err(|err| ConnectionError::transport(&self.server, err))?;

        let payloads = if is_stream {
            sse_payloads(&text)
        } else {
            vec![text]
        };
        for payload in payloads {
            let Ok(value) = serde_json::from_str::<Value>(&payload) else {
                continue;
            };
            if let Some(matched) = self.find_response(value, id) {
                return rpc::extract_result(matched, &self.server);
            }
        }
        Err(ConnectionError::protocol(
            &self.server,
            format!("no response to `{method}` (id {id})"),
        ))
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ConnectionError> {
        self.post(&rpc::notification(method, params), method)
            .await
            .map(|_| ())
    }

    async fn shutdown(&self) -> Result<(), ConnectionError> {
        let Some(session_id) = self.session_id.write().await.take() else {
            return Ok(());
        };
        // Servers may refuse explicit termination; the session is dropped
        // on our side either way.
        let result = self
            .client
            .delete(&self.url)
            .header(SESSION_HEADER, &session_id)
            .send()
            .await;
        if let Err(err) = result {
            debug!(target: "mcp_client", server = %self.server, error = %err, "session delete failed");
        }
        Ok(())
    }
}

/// Collects the `data:` payload of every event in a server-sent event body.
fn sse_payloads(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        if line.is_empty() {
            if !current.is_empty() {
                events.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        events.push(current.join("\n"));
    }
    events
}
