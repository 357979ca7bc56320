//! Startup configuration: the `servers_config.json` file plus environment
//! overrides for API keys.

use std::fs;
use std::path::{Path, PathBuf};

use ai_agent::{AgentConfig, DEFAULT_MAX_TOOL_ITERATIONS};
use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use llm_router::{Provider, RoutingPolicy};
use mcp_client::McpServerConfig;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "servers_config.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopilotConfig {
    #[serde(default)]
    pub mcp_servers: IndexMap<String, McpServerConfig>,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
}

fn default_max_tool_iterations() -> usize {
    DEFAULT_MAX_TOOL_ITERATIONS
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            mcp_servers: IndexMap::new(),
            llm_api_key: None,
            provider: Provider::default(),
            model: None,
            base_url: None,
            cache_path: None,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }
}

impl CopilotConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON in config file {}", path.display()))?;
        if config.max_tool_iterations == 0 {
            bail!("maxToolIterations must be at least 1");
        }
        Ok(config)
    }

    /// The provider's environment variable wins over `llmApiKey`.
    pub fn api_key(&self) -> Result<String> {
        self.api_key_from(|name| std::env::var(name).ok())
    }

    fn api_key_from(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
        let env_name = self.provider.api_key_env();
        lookup(env_name)
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                self.llm_api_key
                    .clone()
                    .filter(|key| !key.trim().is_empty())
            })
            .with_context(|| format!("no API key: set {env_name} or llmApiKey in the config file"))
    }

    pub fn routing_policy(&self, cache_override: Option<PathBuf>) -> RoutingPolicy {
        RoutingPolicy {
            provider: self.provider,
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            cache_path: cache_override.or_else(|| self.cache_path.clone()),
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_tool_iterations: self.max_tool_iterations,
            ..AgentConfig::default()
        }
    }
}
