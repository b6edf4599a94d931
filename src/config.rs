//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all, via [`Config::default`]) is a working configuration using the
//! offline `hash` embedder.
//!
//! ```toml
//! [chunking]
//! strategy = "fixed"        # or "adaptive"
//! max_chunk_size = 800
//! overlap = 100
//!
//! [retrieval]
//! top_k = 5
//! context_budget = 4000
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! max_attempts = 3
//!
//! [generation]
//! provider = "ollama"
//! model = "llama3.2"
//!
//! [server]
//! bind = "127.0.0.1:5000"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::chunk::ChunkConfig;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// `"fixed"` uses the sizes below; `"adaptive"` sizes by document length.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default)]
    pub boundary_window: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_chunk_size: default_max_chunk_size(),
            overlap: default_overlap(),
            boundary_window: None,
        }
    }
}

impl ChunkingConfig {
    /// Chunk parameters for a particular normalized text.
    pub fn chunk_config_for(&self, text: &str) -> ChunkConfig {
        match self.strategy.as_str() {
            "adaptive" => ChunkConfig::adaptive(text.chars().count()),
            _ => ChunkConfig {
                max_chunk_size: self.max_chunk_size,
                overlap: self.overlap,
                boundary_window: self.boundary_window,
            },
        }
    }
}

fn default_strategy() -> String {
    "fixed".to_string()
}
fn default_max_chunk_size() -> usize {
    800
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Character budget for the assembled context.
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_budget: default_context_budget(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_context_budget() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override for HTTP providers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Batches in flight at once while indexing.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Total attempts per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout_secs(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_concurrency() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}
fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl Config {
    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        match self.chunking.strategy.as_str() {
            "fixed" => {
                self.chunking
                    .chunk_config_for("")
                    .validate()
                    .context("invalid [chunking] section")?;
            }
            "adaptive" => {}
            other => bail!(
                "Unknown chunking strategy: '{}'. Must be fixed or adaptive.",
                other
            ),
        }

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.context_budget == 0 {
            bail!("retrieval.context_budget must be > 0");
        }

        let emb = &self.embedding;
        match emb.provider.as_str() {
            "disabled" | "hash" | "openai" | "ollama" | "gemini" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, gemini, or local.",
                other
            ),
        }
        if emb.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if matches!(emb.provider.as_str(), "openai" | "ollama") {
            if emb.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    emb.provider
                );
            }
            if emb.dims.is_none() {
                bail!(
                    "embedding.dims must be specified when provider is '{}'",
                    emb.provider
                );
            }
        }
        if emb.batch_size == 0 {
            bail!("embedding.batch_size must be >= 1");
        }
        if emb.max_concurrency == 0 {
            bail!("embedding.max_concurrency must be >= 1");
        }
        if emb.max_attempts == 0 {
            bail!("embedding.max_attempts must be >= 1");
        }
        if emb.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be > 0");
        }

        match self.generation.provider.as_str() {
            "disabled" | "openai" | "ollama" | "gemini" => {}
            other => bail!(
                "Unknown generation provider: '{}'. Must be disabled, openai, ollama, or gemini.",
                other
            ),
        }

        if self.server.max_upload_bytes == 0 {
            bail!("server.max_upload_bytes must be > 0");
        }

        Ok(())
    }
}

/// Read, parse, and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate TOML config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
