//! In-memory vector index.
//!
//! [`VectorIndex`] is the search contract the session and retriever depend
//! on; [`FlatIndex`] implements it with a brute-force scan, which is exact
//! and fast enough for the few thousand chunks of a single document.
//!
//! Cosine similarity is computed as a dot product: vectors are L2-normalized
//! once on insert and the query is normalized on search. A zero vector
//! scores `0.0` against everything.

use std::sync::RwLock;

use crate::embedding::{dot, l2_normalize};
use crate::error::{RagError, Result};
use crate::models::{RetrievalResult, RetrievedChunk, VectorIndexEntry};

/// Nearest-neighbour store for one document's chunks.
pub trait VectorIndex: Send + Sync {
    /// Dimensionality every vector must have.
    fn dims(&self) -> usize;

    /// Append entries. Fails with [`RagError::DimensionMismatch`] without
    /// inserting anything if any vector has the wrong length.
    fn insert(&self, entries: Vec<VectorIndexEntry>) -> Result<()>;

    /// Top `k` entries by cosine similarity, descending, ties broken by
    /// ascending chunk index.
    fn search(&self, query: &[f32], k: usize) -> Result<RetrievalResult>;

    /// Remove every entry. Idempotent.
    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exact, linear-scan [`VectorIndex`].
#[derive(Debug)]
pub struct FlatIndex {
    dims: usize,
    entries: RwLock<Vec<VectorIndexEntry>>,
}

impl FlatIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: RwLock::new(Vec::new()),
        }
    }

    fn check_dims(&self, actual: usize) -> Result<()> {
        if actual != self.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                actual,
            });
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    fn insert(&self, mut entries: Vec<VectorIndexEntry>) -> Result<()> {
        for entry in &entries {
            self.check_dims(entry.vector.len())?;
        }
        for entry in &mut entries {
            l2_normalize(&mut entry.vector);
        }
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(entries);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<RetrievalResult> {
        self.check_dims(query.len())?;
        if k == 0 {
            return Ok(RetrievalResult::empty());
        }

        let mut query = query.to_vec();
        l2_normalize(&mut query);

        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut scored: Vec<(f32, &VectorIndexEntry)> = entries
            .iter()
            .map(|entry| (dot(&query, &entry.vector), entry))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then(a.index.cmp(&b.index)));
        scored.truncate(k);

        let hits = scored
            .into_iter()
            .map(|(score, entry)| RetrievedChunk {
                chunk_id: entry.chunk_id.clone(),
                index: entry.index,
                start: entry.start,
                end: entry.end,
                score,
                text: entry.text.clone(),
            })
            .collect();

        Ok(RetrievalResult { hits })
    }

    fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
