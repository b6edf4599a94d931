//! Offline feature-hashing embedder.
//!
//! Each lowercase alphanumeric token is hashed with SHA-256; the hash picks a
//! bucket and a sign, and the token adds ±1 there. Texts that share words
//! end up with high cosine similarity. No model, no network, fully
//! deterministic, so it backs the default configuration and the tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{EmbedKind, EmbeddingProvider, ProviderError};
use crate::error::{RagError, Result};

pub const DEFAULT_DIMS: usize = 256;

pub struct HashingProvider {
    dims: usize,
}

impl HashingProvider {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(RagError::InvalidConfig(
                "embedding.dims must be > 0".to_string(),
            ));
        }
        Ok(Self { dims })
    }

    /// Embed one text synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        vector
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(
        &self,
        texts: &[String],
        _kind: EmbedKind,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
