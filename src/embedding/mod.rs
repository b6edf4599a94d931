//! Embedding provider abstraction and the retrying [`Embedder`] client.
//!
//! Backends implement [`EmbeddingProvider`]:
//! - **[`DisabledProvider`]**: fails permanently; used when embeddings are off.
//! - **[`remote::OpenAIProvider`]**: `POST /v1/embeddings`.
//! - **[`remote::OllamaProvider`]**: `POST /api/embed` on a local Ollama.
//! - **[`remote::GeminiProvider`]**: Google `batchEmbedContents`.
//! - **[`hashing::HashingProvider`]**: deterministic feature hashing, offline.
//! - **`local::LocalProvider`**: fastembed models, behind the
//!   `local-embeddings-fastembed` feature.
//!
//! Providers make one attempt and classify failures as
//! [`ProviderError::Transient`] or [`ProviderError::Permanent`]. The
//! [`Embedder`] adds what every backend needs on top:
//!
//! - a timeout on each call (a timeout is transient);
//! - up to `max_attempts` attempts with exponential backoff
//!   (`base_delay × 2^(retry-1)`, capped at `max_delay`);
//! - immediate failure on permanent errors;
//! - a count and dimension check on every response.
//!
//! ```rust,no_run
//! # async fn demo() -> askdoc::error::Result<()> {
//! use askdoc::config::EmbeddingConfig;
//! use askdoc::embedding::Embedder;
//!
//! let embedder = Embedder::from_config(&EmbeddingConfig::default())?; // provider = "hash"
//! let v = embedder.embed_query("what is the refund policy?").await?;
//! assert_eq!(v.len(), embedder.dims());
//! # Ok(())
//! # }
//! ```

pub mod hashing;
#[cfg(feature = "local-embeddings-fastembed")]
pub mod local;
pub mod remote;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

/// Whether a text is being indexed or used to search.
///
/// Some models (Gemini, e5) embed the two differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedKind {
    Document,
    Query,
}

/// Outcome of a single failed provider call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Worth retrying: rate limits, server errors, dropped connections.
    #[error("{0}")]
    Transient(String),
    /// Retrying will not help: bad request, bad key, malformed response.
    #[error("{0}")]
    Permanent(String),
}

/// An embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality every response must have.
    fn dims(&self) -> usize;
    /// Embed `texts` in one attempt, returning vectors in input order.
    async fn embed_batch(
        &self,
        texts: &[String],
        kind: EmbedKind,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;
}

/// Used when `embedding.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(
        &self,
        _texts: &[String],
        _kind: EmbedKind,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Permanent(
            "embedding provider is disabled".to_string(),
        ))
    }
}

/// Timeout and backoff settings for [`Embedder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            timeout: config.timeout(),
        }
    }

    /// Sleep before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EmbeddingConfig::default())
    }
}

/// A provider wrapped with timeout, retry and response validation.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.provider.model_name())
            .field("dims", &self.provider.dims())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Build the configured provider and retry policy.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self::new(
            create_provider(config)?,
            RetryPolicy::from_config(config),
        ))
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Embed one document text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, EmbedKind::Document).await
    }

    /// Embed one search query.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, EmbedKind::Query).await
    }

    async fn embed_one(&self, text: &str, kind: EmbedKind) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()], kind)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("empty embedding response".to_string()))
    }

    /// Embed a batch, retrying transient failures.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmbeddingUnavailable`] when every attempt failed transiently.
    /// - [`RagError::Embedding`] on the first permanent failure, or when the
    ///   provider returns the wrong number of vectors.
    /// - [`RagError::DimensionMismatch`] when a vector has the wrong length.
    pub async fn embed_batch(&self, texts: &[String], kind: EmbedKind) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.delay_for(attempt - 1)).await;
            }

            let outcome =
                tokio::time::timeout(self.policy.timeout, self.provider.embed_batch(texts, kind))
                    .await;

            match outcome {
                Ok(Ok(vectors)) => return self.check(texts.len(), vectors),
                Ok(Err(ProviderError::Permanent(reason))) => {
                    return Err(RagError::Embedding(reason));
                }
                Ok(Err(ProviderError::Transient(reason))) => last_reason = reason,
                Err(_) => {
                    last_reason = format!("timed out after {}ms", self.policy.timeout.as_millis())
                }
            }

            if attempt < max_attempts {
                tracing::warn!(
                    model = %self.provider.model_name(),
                    attempt,
                    max_attempts,
                    reason = %last_reason,
                    "embedding call failed, retrying"
                );
            }
        }

        Err(RagError::EmbeddingUnavailable {
            attempts: max_attempts,
            reason: last_reason,
        })
    }

    fn check(&self, expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
        if vectors.len() != expected {
            return Err(RagError::Embedding(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                expected
            )));
        }
        let dims = self.provider.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(RagError::DimensionMismatch {
                expected: dims,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"hash"` | [`hashing::HashingProvider`] |
/// | `"openai"` | [`remote::OpenAIProvider`] |
/// | `"ollama"` | [`remote::OllamaProvider`] |
/// | `"gemini"` | [`remote::GeminiProvider`] |
/// | `"local"` | `local::LocalProvider` (feature `local-embeddings-fastembed`) |
///
/// # Errors
///
/// [`RagError::InvalidConfig`] for unknown providers, missing model/dims,
/// missing API keys, or `"local"` without the feature.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "hash" => Ok(Arc::new(hashing::HashingProvider::new(
            config.dims.unwrap_or(hashing::DEFAULT_DIMS),
        )?)),
        "openai" => Ok(Arc::new(remote::OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(remote::OllamaProvider::new(config)?)),
        "gemini" => Ok(Arc::new(remote::GeminiProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(local::LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(RagError::InvalidConfig(
            "local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(RagError::InvalidConfig(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or a zero vector.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Scale `v` to unit length in place. Zero vectors are left as they are.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Dot product of two equal-length slices.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
