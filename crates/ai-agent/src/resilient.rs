use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{error, warn};

use crate::language_model::{
    LanguageModelClient, LanguageModelError, LanguageModelResponse, Message, ModelOptions,
};

/// Leading text of every user-facing failure reply produced by
/// [`ResilientModel`]. Responses starting with it are never cached.
pub const ERROR_RESPONSE_PREFIX: &str = "I encountered an error:";

pub fn apology(detail: impl Display) -> String {
    format!("{ERROR_RESPONSE_PREFIX} {detail}. Please try again or rephrase your request.")
}

pub fn is_error_response(text: &str) -> bool {
    text.trim_start().starts_with(ERROR_RESPONSE_PREFIX)
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Server hint when present, otherwise a random pick in the backoff window.
    pub fn backoff(&self, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint.filter(|hint| !hint.is_zero()) {
            return hint;
        }
        if self.max_backoff <= self.min_backoff {
            return self.min_backoff;
        }
        rand::thread_rng().gen_range(self.min_backoff..=self.max_backoff)
    }
}

/// Absorbs rate limits and transport failures so callers always get text.
pub struct ResilientModel {
    inner: Arc<dyn LanguageModelClient>,
    policy: RetryPolicy,
}

impl ResilientModel {
    pub fn new(inner: Arc<dyn LanguageModelClient>, policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self { inner, policy })
    }
}

#[async_trait]
impl LanguageModelClient for ResilientModel {
    async fn complete(
        &self,
        system: &Message,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<LanguageModelResponse, LanguageModelError> {
        let mut retries = 0;
        loop {
            match self.inner.complete(system, history, options).await {
                Ok(response) => return Ok(response),
                Err(LanguageModelError::RateLimited { retry_after })
                    if retries < self.policy.max_retries =>
                {
                    retries += 1;
                    let wait = self.policy.backoff(retry_after);
                    warn!(
                        retry = retries,
                        wait_ms = wait.as_millis() as u64,
                        "language model rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    error!(error = %err, retries, "language model request failed");
                    return Ok(LanguageModelResponse::new(apology(&err)));
                }
            }
        }
    }
}
