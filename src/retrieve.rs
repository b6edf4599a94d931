//! Query-time retrieval: query text → top-K chunks.

use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::models::RetrievalResult;
use crate::normalize::normalize;

/// Embeds queries and searches an index with them.
#[derive(Debug, Clone)]
pub struct Retriever {
    embedder: Embedder,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Embedder, top_k: usize) -> Self {
        Self { embedder, top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Retrieve the `k` (default `top_k`) chunks most similar to `query`.
    ///
    /// The query goes through the same normalizer as documents. A blank
    /// query returns an empty result without calling the embedder.
    pub async fn retrieve(
        &self,
        index: &dyn VectorIndex,
        query: &str,
        k: Option<usize>,
    ) -> Result<RetrievalResult> {
        let query = normalize(query);
        if query.is_empty() {
            return Ok(RetrievalResult::empty());
        }
        let k = k.unwrap_or(self.top_k);
        if k == 0 || index.is_empty() {
            return Ok(RetrievalResult::empty());
        }

        let vector = self.embedder.embed_query(&query).await?;
        let result = index.search(&vector, k)?;
        tracing::debug!(k, hits = result.len(), "retrieved chunks");
        Ok(result)
    }
}
