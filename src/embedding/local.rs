//! Local inference via fastembed.
//!
//! Models are downloaded from Hugging Face on first use and cached; after
//! that no network calls are made. The model is loaded lazily on the first
//! batch and reused. fastembed is synchronous, so calls run on the blocking
//! pool.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::{EmbedKind, EmbeddingProvider, ProviderError};
use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

pub struct LocalProvider {
    model_name: String,
    dims: usize,
    model: fastembed::EmbeddingModel,
    batch_size: usize,
    loaded: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let model = config_to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
            "multilingual-e5-base" => 768,
            "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
            _ => 384,
        });
        Ok(Self {
            model_name,
            dims,
            model,
            batch_size: config.batch_size,
            loaded: Arc::new(Mutex::new(None)),
        })
    }
}

fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(RagError::InvalidConfig(format!(
            "unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}

/// e5 models expect role prefixes on their inputs.
fn prefixed(model_name: &str, texts: &[String], kind: EmbedKind) -> Vec<String> {
    if !model_name.starts_with("multilingual-e5") {
        return texts.to_vec();
    }
    let prefix = match kind {
        EmbedKind::Document => "passage: ",
        EmbedKind::Query => "query: ",
    };
    texts.iter().map(|t| format!("{}{}", prefix, t)).collect()
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(
        &self,
        texts: &[String],
        kind: EmbedKind,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let texts = prefixed(&self.model_name, texts, kind);
        let loaded = self.loaded.clone();
        let model = self.model.clone();
        let batch_size = self.batch_size;

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| ProviderError::Permanent("local model lock poisoned".to_string()))?;
            if guard.is_none() {
                tracing::info!(model = ?model, "loading local embedding model");
                let embedding = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(false),
                )
                .map_err(|e| {
                    ProviderError::Permanent(format!(
                        "failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(embedding);
            }
            let Some(embedding) = guard.as_mut() else {
                return Err(ProviderError::Permanent(
                    "local embedding model not loaded".to_string(),
                ));
            };
            embedding
                .embed(texts, Some(batch_size))
                .map_err(|e| ProviderError::Permanent(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| ProviderError::Permanent(format!("embedding task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_rejected() {
        assert!(config_to_fastembed_model("gpt-embed-9000").is_err());
    }

    #[test]
    fn test_e5_prefixes() {
        let texts = vec!["hello".to_string()];
        assert_eq!(
            prefixed("multilingual-e5-small", &texts, EmbedKind::Query),
            vec!["query: hello".to_string()]
        );
        assert_eq!(prefixed("all-minilm-l6-v2", &texts, EmbedKind::Query), texts);
    }
}
