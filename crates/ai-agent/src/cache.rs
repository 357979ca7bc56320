use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::language_model::{
    LanguageModelClient, LanguageModelError, LanguageModelResponse, Message, ModelOptions,
};
use crate::resilient::is_error_response;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("response cache I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("response cache serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Hex SHA-256 digest of a (system prompt, history) request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Memoized model responses backed by a single JSON file.
///
/// The file is read once in [`ResponseCache::load`] and rewritten in full
/// after every stored entry. Only one writer process is supported.
#[derive(Debug, Default)]
pub struct ResponseCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
}

impl ResponseCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the store at `path`. A missing or unreadable store yields an
    /// empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "response cache is corrupt, starting empty"
                    );
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "response cache is unreadable, starting empty"
                );
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "response cache loaded");
        Self {
            path: Some(path),
            entries,
        }
    }

    pub fn key(system: &Message, history: &[Message]) -> CacheKey {
        let mut sha = Sha256::new();
        sha.update(b"response-cache-v1");
        for message in std::iter::once(system).chain(history) {
            sha.update(message.role.as_str().as_bytes());
            sha.update((message.content.len() as u64).to_le_bytes());
            sha.update(message.content.as_bytes());
        }
        CacheKey(hex::encode(sha.finalize()))
    }

    pub fn get(&self, system: &Message, history: &[Message]) -> Option<&str> {
        self.get_by_key(&Self::key(system, history))
    }

    pub fn get_by_key(&self, key: &CacheKey) -> Option<&str> {
        self.entries.get(key.as_str()).map(String::as_str)
    }

    /// Stores `response` and persists the store. Returns `Ok(false)` without
    /// touching anything when the response is an error reply.
    pub fn put(&mut self, key: CacheKey, response: &str) -> Result<bool, CacheError> {
        if is_error_response(response) {
            debug!(key = key.as_str(), "refusing to cache error response");
            return Ok(false);
        }
        self.entries.insert(key.0, response.to_string());
        self.persist()?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn persist(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(io_err)?;

        let payload = serde_json::to_vec_pretty(&self.entries)?;
        let mut file = NamedTempFile::new_in(dir).map_err(io_err)?;
        file.write_all(&payload).map_err(io_err)?;
        file.persist(path).map_err(|err| io_err(err.error))?;
        Ok(())
    }
}

/// Serves repeated requests from a [`ResponseCache`] instead of the inner
/// model.
pub struct CachedModel {
    inner: Arc<dyn LanguageModelClient>,
    cache: Mutex<ResponseCache>,
}

impl CachedModel {
    pub fn new(inner: Arc<dyn LanguageModelClient>, cache: ResponseCache) -> Arc<Self> {
        Arc::new(Self {
            inner,
            cache: Mutex::new(cache),
        })
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[async_trait]
impl LanguageModelClient for CachedModel {
    async fn complete(
        &self,
        system: &Message,
        history: &[Message],
        options: &ModelOptions,
    ) -> Result<LanguageModelResponse, LanguageModelError> {
        let key = ResponseCache::key(system, history);
        if let Some(hit) = self.cache.lock().await.get_by_key(&key) {
            debug!(key = key.as_str(), "response cache hit");
            return Ok(LanguageModelResponse::new(hit.to_string()));
        }

        let response = self.inner.complete(system, history, options).await?;
        if let Err(err) = self.cache.lock().await.put(key, &response.text) {
            warn!(error = %err, "failed to persist response cache");
        }
        Ok(response)
    }
}
