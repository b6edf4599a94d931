//! Integration tests for the index lifecycle.
//!
//! These drive [`Session`] through uploads, queries, clears and failures
//! with scripted embedding providers, checking the state machine, the atomic
//! index swap and cancellation of superseded builds.

use async_trait::async_trait;
use askdoc::chunk::{ChunkConfig, Chunker};
use askdoc::config::ChunkingConfig;
use askdoc::context::{ContextAssembler, NO_CONTEXT_SENTINEL};
use askdoc::embedding::hashing::HashingProvider;
use askdoc::embedding::{EmbedKind, Embedder, EmbeddingProvider, ProviderError, RetryPolicy};
use askdoc::error::RagError;
use askdoc::index::{FlatIndex, VectorIndex};
use askdoc::models::{DocumentStatus, RetrievalResult};
use askdoc::session::{Session, SessionSettings};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

// ─── Test Providers ─────────────────────────────────────────────────

/// Hashing embedder whose document batches can be held at a gate.
struct GatedProvider {
    inner: HashingProvider,
    gated: AtomicBool,
    gate: Semaphore,
}

impl GatedProvider {
    fn new() -> Self {
        Self {
            inner: HashingProvider::new(64).unwrap(),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }

    fn close(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// New batches pass straight through; batches already waiting stay held.
    fn bypass(&self) {
        self.gated.store(false, Ordering::SeqCst);
    }

    fn open(&self) {
        self.bypass();
        self.gate.add_permits(1_000);
    }
}

#[async_trait]
impl EmbeddingProvider for GatedProvider {
    fn model_name(&self) -> &str {
        "gated"
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed_batch(
        &self,
        texts: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if kind == EmbedKind::Document && self.gated.load(Ordering::SeqCst) {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| ProviderError::Permanent(e.to_string()))?;
            permit.forget();
        }
        self.inner.embed_batch(texts, kind).await
    }
}

/// Always fails with a retryable error.
struct FlakyProvider {
    calls: AtomicU32,
}

#[async_trait]
impl EmbeddingProvider for FlakyProvider {
    fn model_name(&self) -> &str {
        "flaky"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed_batch(
        &self,
        _texts: &[String],
        _kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Transient("HTTP 503 Service Unavailable".to_string()))
    }
}

/// Same vector for every text, so every chunk ties.
struct ConstantProvider;

#[async_trait]
impl EmbeddingProvider for ConstantProvider {
    fn model_name(&self) -> &str {
        "constant"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed_batch(
        &self,
        texts: &[String],
        _kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|_| vec![1.0, 2.0, 3.0]).collect())
    }
}

/// Records the peak number of concurrent calls.
struct CountingProvider {
    inner: HashingProvider,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    fn model_name(&self) -> &str {
        "counting"
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed_batch(
        &self,
        texts: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.embed_batch(texts, kind).await
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
    }
}

fn settings(max_chunk_size: usize, overlap: usize) -> SessionSettings {
    SessionSettings {
        chunking: ChunkingConfig {
            max_chunk_size,
            overlap,
            ..Default::default()
        },
        batch_size: 2,
        max_concurrency: 2,
        ..Default::default()
    }
}

fn session_with(provider: Arc<dyn EmbeddingProvider>, settings: SessionSettings) -> Arc<Session> {
    Arc::new(Session::new(
        "test",
        Embedder::new(provider, fast_policy()),
        settings,
    ))
}

async fn wait_for_state(session: &Session, state: DocumentStatus) {
    for _ in 0..400 {
        if session.status().await.state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never reached {:?}", state);
}

const DOC_X: &str = "Apples grow in orchards.\n\nOrchards need bees for pollination.\n\n\
                     Bees make honey in hives.";
const DOC_Y: &str = "Rockets burn fuel to climb.\n\nOrbits need sideways speed.\n\n\
                     Satellites circle the planet in orbit.";

// ─── Tests ──────────────────────────────────────────────────────────

/// An empty index answers any search with an empty result.
#[test]
fn test_empty_index_search() {
    let index = FlatIndex::new(4);
    let result = index.search(&[0.1, 0.2, 0.3, 0.4], 5).unwrap();
    assert!(result.is_empty());
}

/// Assembling nothing yields the sentinel, never an empty string.
#[test]
fn test_assemble_empty_is_sentinel() {
    let context = ContextAssembler::assemble(&RetrievalResult::empty(), 500);
    assert_eq!(context, NO_CONTEXT_SENTINEL);
    assert!(!context.is_empty());
}

/// A 1000-char run with no boundaries splits at fixed offsets.
#[test]
fn test_fixed_window_offsets() {
    let chunker = Chunker::new(ChunkConfig::new(400, 50)).unwrap();
    let text = "a".repeat(1000);
    let spans: Vec<(usize, usize)> = chunker
        .chunks("doc", &text)
        .map(|c| (c.start, c.end))
        .collect();
    assert_eq!(spans, vec![(0, 400), (350, 750), (700, 1000)]);
}

/// After a re-upload, queries only ever see the new document.
#[tokio::test]
async fn test_reupload_replaces_document() {
    let provider = Arc::new(GatedProvider::new());
    let session = session_with(provider.clone(), settings(40, 5));

    let first = session.upload("x.txt", DOC_X).await.unwrap();
    assert_eq!(first.state, DocumentStatus::Ready);
    let x_id = first.document_id.clone().unwrap();

    provider.close();
    let s = session.clone();
    let rebuild = tokio::spawn(async move { s.upload("y.txt", DOC_Y).await });
    wait_for_state(&session, DocumentStatus::Indexing).await;

    assert!(matches!(
        session.query("bees").await,
        Err(RagError::IndexingInProgress)
    ));

    provider.open();
    let second = rebuild.await.unwrap().unwrap();
    assert_eq!(second.state, DocumentStatus::Ready);
    assert_eq!(second.generation, 2);
    let y_id = second.document_id.clone().unwrap();
    assert_ne!(x_id, y_id);

    let result = session.retrieve("bees honey orchards", Some(10)).await.unwrap();
    assert!(!result.is_empty());
    for hit in result.iter() {
        assert!(hit.chunk_id.starts_with(&y_id), "stale chunk {}", hit.chunk_id);
        assert!(!hit.text.contains("Bees"));
    }
}

/// A newer upload cancels the running build, which reports Superseded.
#[tokio::test]
async fn test_newer_upload_supersedes_running_build() {
    let provider = Arc::new(GatedProvider::new());
    let session = session_with(provider.clone(), settings(40, 5));

    provider.close();
    let s = session.clone();
    let stale = tokio::spawn(async move { s.upload("x.txt", DOC_X).await });
    wait_for_state(&session, DocumentStatus::Indexing).await;

    provider.bypass();
    let fresh = session.upload("y.txt", DOC_Y).await.unwrap();
    assert_eq!(fresh.filename.as_deref(), Some("y.txt"));

    let stale = stale.await.unwrap();
    assert!(matches!(stale, Err(RagError::Superseded)));

    let status = session.status().await;
    assert_eq!(status.state, DocumentStatus::Ready);
    assert_eq!(status.filename.as_deref(), Some("y.txt"));
    assert_eq!(status.generation, 2);
}

/// Clearing during indexing leaves the session empty.
#[tokio::test]
async fn test_clear_cancels_indexing() {
    let provider = Arc::new(GatedProvider::new());
    let session = session_with(provider.clone(), settings(40, 5));

    provider.close();
    let s = session.clone();
    let build = tokio::spawn(async move { s.upload("x.txt", DOC_X).await });
    wait_for_state(&session, DocumentStatus::Indexing).await;

    session.clear().await;
    provider.open();

    assert!(matches!(build.await.unwrap(), Err(RagError::Superseded)));
    let status = session.status().await;
    assert_eq!(status.state, DocumentStatus::Empty);
    assert!(status.document_id.is_none());
    assert!(matches!(
        session.query("bees").await,
        Err(RagError::NoDocumentIndexed)
    ));
}

/// An upload whose caller stops waiting still finishes indexing.
#[tokio::test]
async fn test_abandoned_upload_still_completes() {
    let provider = Arc::new(GatedProvider::new());
    let session = session_with(provider.clone(), settings(40, 5));

    provider.close();
    let waited =
        tokio::time::timeout(Duration::from_millis(50), session.upload("x.txt", DOC_X)).await;
    assert!(waited.is_err());
    assert_eq!(session.status().await.state, DocumentStatus::Indexing);

    provider.open();
    wait_for_state(&session, DocumentStatus::Ready).await;

    let status = session.status().await;
    assert_eq!(status.filename.as_deref(), Some("x.txt"));
    assert_eq!(status.generation, 1);
    assert!(status.chunk_count > 0);
    let bundle = session.query("bees honey").await.unwrap();
    assert!(bundle.has_context());
}

/// Three failing attempts leave the document failed and unqueryable.
#[tokio::test]
async fn test_exhausted_retries_fail_the_document() {
    let provider = Arc::new(FlakyProvider {
        calls: AtomicU32::new(0),
    });
    let session = session_with(provider.clone(), settings(500, 50));

    let err = session.upload("x.txt", "A short document.").await.unwrap_err();
    assert!(matches!(
        err,
        RagError::EmbeddingUnavailable { attempts: 3, .. }
    ));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

    let status = session.status().await;
    assert_eq!(status.state, DocumentStatus::Failed);
    assert!(status.failure.unwrap().contains("after 3 attempt(s)"));
    assert_eq!(status.chunk_count, 0);

    assert!(matches!(
        session.query("anything").await,
        Err(RagError::NoDocumentIndexed)
    ));
}

/// A failed upload can be followed by a successful one.
#[tokio::test]
async fn test_recovers_after_failure() {
    let session = session_with(Arc::new(HashingProvider::new(32).unwrap()), settings(60, 10));
    assert!(session.upload("blank.txt", "\n\n  \n").await.is_err());
    assert_eq!(session.status().await.state, DocumentStatus::Failed);

    let status = session.upload("x.txt", DOC_X).await.unwrap();
    assert_eq!(status.state, DocumentStatus::Ready);
    assert!(status.failure.is_none());
}

/// Equal scores come back in chunk order.
#[tokio::test]
async fn test_ties_ordered_by_chunk_index() {
    let session = session_with(Arc::new(ConstantProvider), settings(30, 0));
    let status = session.upload("y.txt", DOC_Y).await.unwrap();
    assert!(status.chunk_count >= 3);

    let result = session.retrieve("anything", Some(10)).await.unwrap();
    let order: Vec<usize> = result.iter().map(|h| h.index).collect();
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(order, sorted);
    assert_eq!(order.len(), status.chunk_count);
}

/// Embedding runs at most `max_concurrency` batches at once and keeps
/// vectors aligned with their chunks.
#[tokio::test]
async fn test_bounded_embedding_concurrency() {
    let provider = Arc::new(CountingProvider {
        inner: HashingProvider::new(128).unwrap(),
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut settings = settings(60, 0);
    settings.chunking.boundary_window = Some(40);
    settings.batch_size = 1;
    settings.max_concurrency = 2;
    let session = session_with(provider.clone(), settings);

    let text = (0..12)
        .map(|i| format!("Paragraph number {} talks about topic{}.", i, i))
        .collect::<Vec<_>>()
        .join("\n\n");
    let status = session.upload("many.txt", &text).await.unwrap();
    assert!(status.chunk_count >= 12);

    let peak = provider.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency {}", peak);

    let result = session.retrieve("topic7", Some(1)).await.unwrap();
    assert!(result.hits[0].text.contains("topic7"));
}

/// Concurrent queries against a ready session all succeed.
#[tokio::test]
async fn test_concurrent_queries() {
    let session = session_with(Arc::new(HashingProvider::new(64).unwrap()), settings(40, 5));
    session.upload("x.txt", DOC_X).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let s = session.clone();
        handles.push(tokio::spawn(async move { s.query("honey bees").await }));
    }
    for handle in handles {
        let bundle = handle.await.unwrap().unwrap();
        assert!(bundle.has_context());
    }
}
