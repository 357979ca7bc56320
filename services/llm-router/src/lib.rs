use std::path::PathBuf;
use std::sync::Arc;

use ai_agent::{CachedModel, LanguageModelClient, ResilientModel, ResponseCache, RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

mod anthropic;
mod http;
mod openai;

pub use anthropic::{AnthropicClient, ANTHROPIC_API_BASE, DEFAULT_ANTHROPIC_MODEL};
pub use http::{parse_reset, retry_hint};
pub use openai::{OpenAiClient, DEFAULT_OPENAI_MODEL, OPENAI_API_BASE};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Provider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl Provider {
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => DEFAULT_OPENAI_MODEL,
            Provider::Anthropic => DEFAULT_ANTHROPIC_MODEL,
        }
    }

    /// Environment variable whose key takes precedence over configuration.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingPolicy {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Responses are memoized in this file when set.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no API key configured for {0:?}")]
    MissingApiKey(Provider),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Builds the model stack every agent talks to: the vendor adapter, the
/// optional response cache around it and rate-limit handling outside both.
#[derive(Clone)]
pub struct LlmRouter {
    api_key: String,
    retry: RetryPolicy,
}

impl LlmRouter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn route(&self, policy: &RoutingPolicy) -> Result<Arc<dyn LanguageModelClient>, RouterError> {
        if self.api_key.trim().is_empty() {
            return Err(RouterError::MissingApiKey(policy.provider));
        }
        let model = policy
            .model
            .clone()
            .unwrap_or_else(|| policy.provider.default_model().to_string());
        info!(provider = ?policy.provider, model = %model, "routing language model");

        let vendor: Arc<dyn LanguageModelClient> = match policy.provider {
            Provider::OpenAi => {
                let client = OpenAiClient::new(self.api_key.clone(), model)?;
                Arc::new(match &policy.base_url {
                    Some(url) => client.with_base_url(url.clone()),
                    None => client,
                })
            }
            Provider::Anthropic => {
                let client = AnthropicClient::new(self.api_key.clone(), model)?;
                Arc::new(match &policy.base_url {
                    Some(url) => client.with_base_url(url.clone()),
                    None => client,
                })
            }
        };

        let cached: Arc<dyn LanguageModelClient> = match &policy.cache_path {
            Some(path) => {
                let cache = ResponseCache::load(path.clone());
                info!(path = %path.display(), entries = cache.len(), "response cache loaded");
                CachedModel::new(vendor, cache)
            }
            None => vendor,
        };
        Ok(ResilientModel::new(cached, self.retry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_agent::{is_error_response, Message, ModelOptions};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn policy_reads_camel_case_config() {
        let policy: RoutingPolicy = serde_json::from_value(json!({
            "provider": "anthropic",
            "cachePath": "llm_cache.json"
        }))
        .expect("policy decodes");
        assert_eq!(policy.provider, Provider::Anthropic);
        assert_eq!(policy.cache_path, Some(PathBuf::from("llm_cache.json")));
        assert!(policy.model.is_none());
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = LlmRouter::new("  ")
            .route(&RoutingPolicy::default())
            .err()
            .expect("missing key");
        assert!(matches!(err, RouterError::MissingApiKey(Provider::OpenAi)));
    }

    #[tokio::test]
    async fn routed_stack_caches_answers_and_apologizes_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Navigated to github.com"}}]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let policy = RoutingPolicy {
            provider: Provider::OpenAi,
            model: None,
            base_url: Some(server.uri()),
            cache_path: Some(dir.path().join("cache.json")),
        };
        let model = LlmRouter::new("key")
            .with_retry_policy(RetryPolicy {
                max_retries: 1,
                min_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            })
            .route(&policy)
            .expect("route");

        let system = Message::system("sys");
        let history = [Message::user("open github")];
        let options = ModelOptions::default();
        let first = model.complete(&system, &history, &options).await.expect("first");
        let second = model.complete(&system, &history, &options).await.expect("cached");
        assert_eq!(first.text, "Navigated to github.com");
        assert_eq!(second.text, first.text);

        let other = model
            .complete(&system, &[Message::user("something else")], &options)
            .await
            .expect("apology instead of error");
        assert!(is_error_response(&other.text));
        assert!(dir.path().join("cache.json").exists());
    }
}
