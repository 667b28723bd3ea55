//! TOML configuration.
//!
//! Everything except secrets lives in the config file (default
//! `./config/rdk.toml`). API keys are read from the environment:
//! `RAGIE_API_KEY`, `GEMINI_API_KEY` and `GROQ_API_KEY`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ragdesk_core::clusters::{ClusterSet, MetadataCluster};
use ragdesk_core::extract::DEFAULT_KEYS;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub partition: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            partition: None,
        }
    }
}

fn default_base_url() -> String {
    "https://api.ragie.ai".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_page_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Overrides the provider's API endpoint (tests, proxies).
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            timeout_secs: default_llm_timeout_secs(),
            system_prompt: None,
            base_url: None,
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Wizard and chat sessions idle longer than this are dropped.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_session_ttl() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetadataConfig {
    #[serde(default = "default_keys")]
    pub default_keys: Vec<String>,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            default_keys: default_keys(),
            clusters: Vec::new(),
        }
    }
}

fn default_keys() -> Vec<String> {
    DEFAULT_KEYS.iter().map(|k| k.to_string()).collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
}

impl MetadataConfig {
    /// The configured clusters, or the built-in set when none are given.
    pub fn cluster_set(&self) -> Result<ClusterSet> {
        if self.clusters.is_empty() {
            return Ok(ClusterSet::builtin());
        }
        let clusters = self
            .clusters
            .iter()
            .map(|c| {
                MetadataCluster::new(
                    &c.key,
                    c.label.as_deref().unwrap_or(&c.key),
                    &c.description,
                    c.priority,
                )
            })
            .collect();
        ClusterSet::new(clusters).context("Invalid metadata.clusters")
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FiltersConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

impl Config {
    /// Defaults for every section; used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

/// Reads, parses and validates a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but falls back to [`Config::minimal`] when the
/// file does not exist.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.registry.page_size == 0 {
        anyhow::bail!("registry.page_size must be >= 1");
    }
    if config.registry.timeout_secs == 0 {
        anyhow::bail!("registry.timeout_secs must be > 0");
    }
    if config.server.session_ttl_secs == 0 {
        anyhow::bail!("server.session_ttl_secs must be > 0");
    }

    match config.llm.provider.as_str() {
        "disabled" | "gemini" | "groq" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, gemini, or groq.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    config.metadata.cluster_set()?;
    Ok(())
}
