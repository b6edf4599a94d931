//! Error types for the indexing and retrieval pipeline.
//!
//! Library code returns [`RagError`]; the binary and server glue wrap it in
//! `anyhow` or map it onto HTTP responses via [`RagError::code`].

use thiserror::Error;

/// Every failure the pipeline can surface to a caller.
#[derive(Error, Debug)]
pub enum RagError {
    /// Chunker or retrieval parameters are unusable. Raised at config time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The uploaded content type has no extractor.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A supported format could not be parsed.
    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// Extraction succeeded but nothing indexable was left after normalization.
    #[error("document contains no extractable text")]
    EmptyDocument,

    /// Transient embedding failures exhausted every retry attempt.
    #[error("embedding service unavailable after {attempts} attempt(s): {reason}")]
    EmbeddingUnavailable { attempts: u32, reason: String },

    /// The embedding backend rejected the request outright.
    #[error("embedding request failed: {0}")]
    Embedding(String),

    /// A query arrived while no document is ready (empty or failed session).
    #[error("no document has been indexed")]
    NoDocumentIndexed,

    /// A query arrived while a rebuild is running.
    #[error("a document is currently being indexed")]
    IndexingInProgress,

    /// Vectors from different models or dimensions were mixed.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The build was cancelled by a newer upload or a clear.
    #[error("indexing was superseded by a newer request")]
    Superseded,

    /// The answer generation collaborator failed.
    #[error("answer generation failed: {0}")]
    Generation(String),
}

impl RagError {
    /// Stable machine-readable code used in JSON error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::InvalidConfig(_) => "invalid_config",
            RagError::UnsupportedFormat(_) => "unsupported_format",
            RagError::Extraction(_) => "extraction_failed",
            RagError::EmptyDocument => "empty_document",
            RagError::EmbeddingUnavailable { .. } => "embedding_unavailable",
            RagError::Embedding(_) => "embedding_failed",
            RagError::NoDocumentIndexed => "no_document",
            RagError::IndexingInProgress => "indexing_in_progress",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::Superseded => "superseded",
            RagError::Generation(_) => "generation_failed",
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingUnavailable { .. }
                | RagError::IndexingInProgress
                | RagError::Superseded
        )
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;
