//! Index lifecycle: one active document per session.
//!
//! A [`Session`] owns the document, its chunk count and its vector index,
//! and moves through
//!
//! ```text
//!            upload                 build ok
//!   Empty ───────────▶ Indexing ───────────────▶ Ready
//!     ▲                   │  build failed           │
//!     │                   ▼                         │
//!     └──── clear ──── Failed ◀─────────────────────┘ (next upload resets)
//! ```
//!
//! `upload` always starts from scratch: the old document and index are
//! dropped before the new one is built, and the generation counter is
//! bumped. The heavy work (normalize, chunk, embed) runs on its own task
//! without holding the state lock, so a caller that stops waiting on
//! `upload` does not strand the session in `Indexing`; the finished index is swapped in as an immutable
//! `Arc<FlatIndex>` under the write lock, and only if its generation is still
//! current. A newer `upload` or a `clear` cancels the running build through
//! its [`CancellationToken`]; a build that finishes anyway is discarded with
//! [`RagError::Superseded`].
//!
//! Queries take a snapshot of the index under the read lock and search it
//! after releasing the lock, so a query sees either a complete index or a
//! typed "not ready" error, never a partial build.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::chunk::Chunker;
use crate::config::{ChunkingConfig, Config};
use crate::context::ContextAssembler;
use crate::embedding::{EmbedKind, Embedder};
use crate::error::{RagError, Result};
use crate::index::{FlatIndex, VectorIndex};
use crate::models::{
    Chunk, ContextBundle, Document, DocumentStatus, RetrievalResult, VectorIndexEntry,
};
use crate::normalize::normalize;
use crate::progress::{IndexProgressEvent, IndexProgressReporter, NoProgress};
use crate::retrieve::Retriever;

/// Session id used when a request does not name one.
pub const DEFAULT_SESSION: &str = "default";

/// The parts of [`Config`] a session needs.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub context_budget: usize,
    pub batch_size: usize,
    pub max_concurrency: usize,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking.clone(),
            top_k: config.retrieval.top_k,
            context_budget: config.retrieval.context_budget,
            batch_size: config.embedding.batch_size.max(1),
            max_concurrency: config.embedding.max_concurrency.max(1),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Point-in-time view of a session, safe to serialize to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: DocumentStatus,
    pub document_id: Option<String>,
    pub filename: Option<String>,
    pub chunk_count: usize,
    pub generation: u64,
    pub failure: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

struct SessionState {
    status: DocumentStatus,
    generation: u64,
    document: Option<Document>,
    chunk_count: usize,
    index: Option<Arc<FlatIndex>>,
    failure: Option<String>,
    cancel: CancellationToken,
}

impl SessionStatus {
    /// Status of a session that has never held a document.
    pub fn empty() -> Self {
        SessionState::empty(0).snapshot()
    }
}

impl SessionState {
    fn empty(generation: u64) -> Self {
        Self {
            status: DocumentStatus::Empty,
            generation,
            document: None,
            chunk_count: 0,
            index: None,
            failure: None,
            cancel: CancellationToken::new(),
        }
    }

    fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            state: self.status,
            document_id: self.document.as_ref().map(|d| d.id.clone()),
            filename: self.document.as_ref().map(|d| d.filename.clone()),
            chunk_count: self.chunk_count,
            generation: self.generation,
            failure: self.failure.clone(),
            uploaded_at: self.document.as_ref().map(|d| d.uploaded_at),
        }
    }

    fn set_status(&mut self, status: DocumentStatus) {
        self.status = status;
        if let Some(document) = self.document.as_mut() {
            document.status = status;
        }
    }
}

/// Owner of one document's index. See the module docs for the lifecycle.
pub struct Session {
    id: String,
    embedder: Embedder,
    retriever: Retriever,
    settings: SessionSettings,
    reporter: Arc<dyn IndexProgressReporter>,
    state: Arc<RwLock<SessionState>>,
}

impl Session {
    pub fn new(id: impl Into<String>, embedder: Embedder, settings: SessionSettings) -> Self {
        Self {
            id: id.into(),
            retriever: Retriever::new(embedder.clone(), settings.top_k),
            embedder,
            settings,
            reporter: Arc::new(NoProgress),
            state: Arc::new(RwLock::new(SessionState::empty(0))),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn IndexProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.read().await.snapshot()
    }

    /// Replace the active document with `raw_text` and index it.
    ///
    /// Returns the `Ready` status on success. On failure the session is left
    /// `Failed` with the error's message as the reason, except for
    /// [`RagError::Superseded`], where the newer request owns the state.
    pub async fn upload(&self, filename: &str, raw_text: &str) -> Result<SessionStatus> {
        let document = Document {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            raw_text: raw_text.to_string(),
            normalized_text: normalize(raw_text),
            status: DocumentStatus::Indexing,
            uploaded_at: Utc::now(),
        };

        let (generation, token) = {
            let mut state = self.state.write().await;
            state.cancel.cancel();
            let generation = state.generation + 1;
            *state = SessionState::empty(generation);
            state.document = Some(document.clone());
            state.set_status(DocumentStatus::Indexing);
            (generation, state.cancel.clone())
        };

        tracing::info!(
            session = %self.id,
            generation,
            file = %filename,
            chars = document.normalized_text.chars().count(),
            "indexing document"
        );

        let job = IndexJob {
            session: self.id.clone(),
            embedder: self.embedder.clone(),
            settings: self.settings.clone(),
            reporter: self.reporter.clone(),
            state: self.state.clone(),
        };
        match tokio::spawn(job.run(document, generation, token)).await {
            Ok(result) => result,
            Err(e) => {
                let err = RagError::Embedding(format!("indexing task failed: {}", e));
                let mut state = self.state.write().await;
                if state.generation == generation {
                    state.index = None;
                    state.chunk_count = 0;
                    state.failure = Some(err.to_string());
                    state.set_status(DocumentStatus::Failed);
                }
                tracing::error!(
                    session = %self.id,
                    generation,
                    error = %e,
                    "indexing task aborted"
                );
                Err(err)
            }
        }
    }

    /// Drop the document and index, cancelling any running build.
    /// Clearing an empty session does nothing.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        if state.status == DocumentStatus::Empty {
            return;
        }
        state.cancel.cancel();
        let generation = state.generation + 1;
        *state = SessionState::empty(generation);
        tracing::info!(session = %self.id, generation, "session cleared");
    }

    /// Snapshot the index if the session is ready.
    async fn ready_index(&self) -> Result<Arc<FlatIndex>> {
        let state = self.state.read().await;
        match (state.status, &state.index) {
            (DocumentStatus::Ready, Some(index)) => Ok(index.clone()),
            (DocumentStatus::Indexing, _) => Err(RagError::IndexingInProgress),
            _ => Err(RagError::NoDocumentIndexed),
        }
    }

    /// Top `k` (default `top_k`) chunks for `query`.
    pub async fn retrieve(&self, query: &str, k: Option<usize>) -> Result<RetrievalResult> {
        let index = self.ready_index().await?;
        self.retriever.retrieve(index.as_ref(), query, k).await
    }

    /// Retrieve and assemble the grounded context for `query`.
    pub async fn query(&self, query: &str) -> Result<ContextBundle> {
        let results = self.retrieve(query, None).await?;
        Ok(ContextAssembler::new(self.settings.context_budget).bundle(query, &results))
    }
}

/// One index build, detached from the request that started it.
struct IndexJob {
    session: String,
    embedder: Embedder,
    settings: SessionSettings,
    reporter: Arc<dyn IndexProgressReporter>,
    state: Arc<RwLock<SessionState>>,
}

impl IndexJob {
    /// Build the index, then publish it or record the failure, unless a
    /// newer generation has taken over.
    async fn run(
        self,
        document: Document,
        generation: u64,
        token: CancellationToken,
    ) -> Result<SessionStatus> {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(RagError::Superseded),
            built = self.build(&document) => built,
        };

        let mut state = self.state.write().await;
        if state.generation != generation {
            tracing::info!(
                session = %self.session,
                generation,
                current = state.generation,
                "discarding superseded index build"
            );
            return Err(RagError::Superseded);
        }

        let filename = document.filename;
        match outcome {
            Ok(index) => {
                state.chunk_count = index.len();
                state.index = Some(Arc::new(index));
                state.set_status(DocumentStatus::Ready);
                tracing::info!(
                    session = %self.session,
                    generation,
                    chunks = state.chunk_count,
                    "index ready"
                );
                self.reporter.report(IndexProgressEvent::Ready {
                    filename,
                    chunks: state.chunk_count as u64,
                });
                Ok(state.snapshot())
            }
            Err(e) => {
                state.index = None;
                state.chunk_count = 0;
                state.failure = Some(e.to_string());
                state.set_status(DocumentStatus::Failed);
                tracing::warn!(
                    session = %self.session,
                    generation,
                    code = e.code(),
                    error = %e,
                    "indexing failed"
                );
                self.reporter.report(IndexProgressEvent::Failed {
                    filename,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Normalize → chunk → embed → fresh index. Touches no session state.
    async fn build(&self, document: &Document) -> Result<FlatIndex> {
        let text = &document.normalized_text;
        if text.is_empty() {
            return Err(RagError::EmptyDocument);
        }

        let chunker = Chunker::new(self.settings.chunking.chunk_config_for(text))?;
        let chunks: Vec<Chunk> = chunker.chunks(&document.id, text).collect();
        tracing::debug!(
            session = %self.session,
            chunks = chunks.len(),
            max_chunk_size = chunker.config().max_chunk_size,
            overlap = chunker.config().overlap,
            "chunked document"
        );
        self.reporter.report(IndexProgressEvent::Chunked {
            filename: document.filename.clone(),
            chunks: chunks.len() as u64,
        });

        let vectors = self.embed_chunks(&document.filename, &chunks).await?;

        let index = FlatIndex::new(self.embedder.dims());
        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorIndexEntry::new(chunk, vector))
            .collect();
        index.insert(entries)?;
        Ok(index)
    }

    /// Embed chunk texts in batches with at most `max_concurrency` in flight.
    ///
    /// Returns vectors in chunk order. The first failure aborts the
    /// remaining batches.
    async fn embed_chunks(&self, filename: &str, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let total = chunks.len() as u64;
        let batches: Vec<Vec<String>> = chunks
            .chunks(self.settings.batch_size)
            .map(|batch| batch.iter().map(|c| c.text.clone()).collect())
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut tasks = JoinSet::new();
        for (batch_no, texts) in batches.iter().cloned().enumerate() {
            let embedder = self.embedder.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| RagError::Superseded)?;
                let vectors = embedder.embed_batch(&texts, EmbedKind::Document).await?;
                Ok::<_, RagError>((batch_no, vectors))
            });
        }

        let mut slots: Vec<Option<Vec<Vec<f32>>>> = vec![None; batches.len()];
        let mut done = 0u64;
        while let Some(joined) = tasks.join_next().await {
            let (batch_no, vectors) = joined
                .map_err(|e| RagError::Embedding(format!("embedding task failed: {}", e)))??;
            done += vectors.len() as u64;
            slots[batch_no] = Some(vectors);
            self.reporter.report(IndexProgressEvent::Embedding {
                filename: filename.to_string(),
                n: done,
                total,
            });
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for slot in slots {
            let batch = slot
                .ok_or_else(|| RagError::Embedding("embedding batch missing".to_string()))?;
            vectors.extend(batch);
        }
        Ok(vectors)
    }
}

/// Sessions keyed by client-supplied id.
///
/// Sessions are created by uploads and dropped by clears; read-only requests
/// for an unknown id never allocate one.
pub struct SessionRegistry {
    embedder: Embedder,
    settings: SessionSettings,
    reporter: Arc<dyn IndexProgressReporter>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(embedder: Embedder, settings: SessionSettings) -> Self {
        Self {
            embedder,
            settings,
            reporter: Arc::new(NoProgress),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn IndexProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The session for `id`, creating an empty one if needed.
    pub async fn get_or_create(&self, id: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return session.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session = %id, "creating session");
                Arc::new(
                    Session::new(id, self.embedder.clone(), self.settings.clone())
                        .with_reporter(self.reporter.clone()),
                )
            })
            .clone()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Clear and forget a session.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(session) => {
                session.clear().await;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
