//! Scripted doubles shared by this workspace's tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::language_model::{
    LanguageModelClient, LanguageModelError, LanguageModelResponse, Message, ModelOptions,
};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: Message,
    pub history: Vec<Message>,
}

/// Replays a fixed queue of responses and records every request it sees.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, LanguageModelError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    pub fn with_results(responses: Vec<Result<String, LanguageModelError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.responses.lock().await.len()
    }
}

#[async_trait]
impl LanguageModelClient for ScriptedModel {
    async fn complete(
        &self,
        system: &Message,
        history: &[Message],
        _options: &ModelOptions,
    ) -> Result<LanguageModelResponse, LanguageModelError> {
        self.requests.lock().await.push(RecordedRequest {
            system: system.clone(),
            history: history.to_vec(),
        });
        let next = self.responses.lock().await.pop_front().ok_or_else(|| {
            LanguageModelError::transport("scripted model ran out of responses")
        })?;
        next.map(LanguageModelResponse::new)
    }
}
