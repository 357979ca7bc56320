use std::time::Duration;

use ai_agent::{
    LanguageModelClient, LanguageModelError, LanguageModelResponse, LanguageModelUsage, Message,
    ModelOptions, Role,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::http::{read_json, transport_error};
use crate::RouterError;

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-7-sonnet-20250219";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Messages API client.
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, RouterError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| RouterError::Client(err.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_BASE.to_string(),
            model: model.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn payload(&self, system: &Message, history: &[Message], options: &ModelOptions) -> Value {
        // The messages API takes one top-level system prompt; in-history
        // system turns are tool outcomes and go to the model as user turns.
        let messages: Vec<Value> = history
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::Assistant => "assistant",
                    Role::User | Role::System => "user",
                };
                json!({ "role": role, "content": message.content })
            })
            .collect();

        let mut payload = json!({
            "model": self.model,
            "system": system.content,
            "messages": messages,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": options.temperature,
        });
        if let Some(top_p) = options.top_p {
            payload["top_p"] = json!(top_p);
        }
        payload
    }
}

#[async_trait]
impl LanguageModelClient for AnthropicClient {
    async fn complete(
        &self,
        system: &Message,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<LanguageModelResponse, LanguageModelError> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        debug!(model = %self.model, messages = history.len(), "requesting message");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.payload(system, history, options))
            .send()
            .await
            .map_err(|err| transport_error("Claude", err))?;
        let body = read_json(response, "Claude").await?;

        let message: MessagesResponse = serde_json::from_value(body).map_err(|err| {
            LanguageModelError::transport(format!("unexpected Claude response: {err}"))
        })?;
        let text: Vec<String> = message
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(LanguageModelError::transport(
                "Claude response had no text content",
            ));
        }

        let usage = message
            .usage
            .map(|usage| LanguageModelUsage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                total_tokens: usage.input_tokens.zip(usage.output_tokens).map(|(i, o)| i + o),
            })
            .unwrap_or_default();
        Ok(LanguageModelResponse {
            text: text.join(""),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AnthropicClient {
        AnthropicClient::new("test_api_key", DEFAULT_ANTHROPIC_MODEL)
            .expect("client builds")
            .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn lifts_system_prompt_and_maps_tool_outcomes_to_user_turns() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test_api_key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "system": "You are a browser automation assistant.",
                "messages": [
                    {"role": "user", "content": "navigate to github.com"},
                    {"role": "assistant", "content": "{\"tool\":\"browser_navigate\"}"},
                    {"role": "user", "content": "Tool execution result: done"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_123",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "Navigated to github.com"}],
                "usage": {"input_tokens": 40, "output_tokens": 6}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let history = [
            Message::user("navigate to github.com"),
            Message::assistant("{\"tool\":\"browser_navigate\"}"),
            Message::system("Tool execution result: done"),
        ];
        let response = client_for(&server)
            .complete(
                &Message::system("You are a browser automation assistant."),
                &history,
                &ModelOptions::default(),
            )
            .await
            .expect("completion");

        assert_eq!(response.text, "Navigated to github.com");
        assert_eq!(response.usage.total_tokens, Some(46));
    }

    #[tokio::test]
    async fn retry_after_header_is_seconds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&Message::system("s"), &[Message::user("u")], &ModelOptions::default())
            .await
            .expect_err("rate limited");

        assert!(matches!(
            err,
            LanguageModelError::RateLimited { retry_after: Some(hint) } if hint == Duration::from_secs(12)
        ));
    }
}
