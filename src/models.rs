//! Core data models used throughout askdoc.
//!
//! These types represent the document, its chunks, the entries stored in the
//! vector index and the ranked results that flow out of retrieval.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle state of a session's active document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Empty,
    Indexing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Empty => "empty",
            DocumentStatus::Indexing => "indexing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single active document of a session.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub raw_text: String,
    pub normalized_text: String,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
}

/// A contiguous span of a document's normalized text.
///
/// `text` is always exactly `normalized_text[start..end]`; offsets are byte
/// offsets that fall on char boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    pub embedding: Option<Vec<f32>>,
}

/// The stored form of a [`Chunk`] inside a vector index.
#[derive(Debug, Clone)]
pub struct VectorIndexEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

impl VectorIndexEntry {
    /// Pair a chunk with its embedding.
    pub fn new(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            index: chunk.index,
            start: chunk.start,
            end: chunk.end,
            text: chunk.text,
            vector,
        }
    }
}

/// One ranked hit from a vector search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub score: f32,
    pub text: String,
}

/// Hits ordered by descending score, ties by ascending chunk index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RetrievedChunk> {
        self.hits.iter()
    }
}

/// What a query hands to the answer generator: the assembled context plus
/// the chunks it was built from.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub query: String,
    pub context: String,
    pub chunks: Vec<RetrievedChunk>,
}

impl ContextBundle {
    /// True when retrieval produced nothing usable.
    pub fn has_context(&self) -> bool {
        self.context != crate::context::NO_CONTEXT_SENTINEL
    }
}
