use std::time::Duration;

use ai_agent::{
    LanguageModelClient, LanguageModelError, LanguageModelResponse, LanguageModelUsage, Message,
    ModelOptions,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::http::{read_json, transport_error};
use crate::RouterError;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat completions client.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, RouterError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| RouterError::Client(err.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: OPENAI_API_BASE.to_string(),
            model: model.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn payload(&self, system: &Message, history: &[Message], options: &ModelOptions) -> Value {
        let messages: Vec<Value> = std::iter::once(system)
            .chain(history)
            .map(|message| json!({ "role": message.role, "content": message.content }))
            .collect();

        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
        });
        if let Some(max_tokens) = options.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = options.top_p {
            payload["top_p"] = json!(top_p);
        }
        payload
    }
}

#[async_trait]
impl LanguageModelClient for OpenAiClient {
    async fn complete(
        &self,
        system: &Message,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<LanguageModelResponse, LanguageModelError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(model = %self.model, messages = history.len() + 1, "requesting chat completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.payload(system, history, options))
            .send()
            .await
            .map_err(|err| transport_error("OpenAI", err))?;
        let body = read_json(response, "OpenAI").await?;

        let completion: ChatCompletion = serde_json::from_value(body).map_err(|err| {
            LanguageModelError::transport(format!("unexpected OpenAI response: {err}"))
        })?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LanguageModelError::transport("OpenAI response had no choices"))?;

        let usage = completion
            .usage
            .map(|usage| LanguageModelUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            })
            .unwrap_or_default();
        Ok(LanguageModelResponse { text, usage })
    }
}
