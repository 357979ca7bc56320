//! JSON-RPC 2.0 framing shared by the stdio and HTTP transports.

use ai_agent::ToolDescriptor;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ConnectionError;
use crate::session::ToolOutput;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "copilot",
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// True for the response to `request_id`. Server-initiated requests carry
/// their own ids and a `method`, so they never match.
pub fn matches_request(payload: &Value, request_id: u64) -> bool {
    if payload.get("method").is_some() {
        return false;
    }
    match payload.get("id") {
        Some(Value::Number(num)) => num.as_u64() == Some(request_id),
        Some(Value::String(text)) => text.parse::<u64>().map_or(false, |id| id == request_id),
        _ => false,
    }
}

/// A message the server sent on its own: a notification or a request.
pub fn server_method(payload: &Value) -> Option<&str> {
    payload.get("method").and_then(Value::as_str)
}

pub fn extract_result(payload: Value, server: &str) -> Result<Value, ConnectionError> {
    if let Some(error) = payload.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ConnectionError::protocol(server, message));
    }

    match payload {
        Value::Object(mut map) => Ok(map.remove("result").unwrap_or(Value::Null)),
        other => Err(ConnectionError::protocol(
            server,
            format!("unexpected JSON-RPC payload: {other}"),
        )),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolListPage {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Decodes one `tools/list` page into its tools and continuation cursor.
pub fn decode_tool_page(
    result: Value,
    server: &str,
) -> Result<(Vec<ToolDescriptor>, Option<String>), ConnectionError> {
    let page: ToolListPage = serde_json::from_value(result).map_err(|err| {
        ConnectionError::protocol(server, format!("invalid tools/list response: {err}"))
    })?;
    Ok((page.tools, page.next_cursor))
}

pub fn decode_tool_output(result: Value, server: &str) -> Result<ToolOutput, ConnectionError> {
    serde_json::from_value(result).map_err(|err| {
        ConnectionError::protocol(server, format!("invalid tools/call response: {err}"))
    })
}

pub fn list_params(cursor: Option<&str>) -> Value {
    match cursor {
        Some(cursor) => json!({ "cursor": cursor }),
        None => json!({}),
    }
}

pub fn call_params(name: &str, arguments: &serde_json::Map<String, Value>) -> Value {
    json!({
        "name": name,
        "arguments": arguments
    })
}
