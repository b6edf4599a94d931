//! HTTP API for upload, query and clear.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload` | Multipart upload (field `file`); extracts and indexes the document |
//! | `POST` | `/query`  | `{"query": "...", "top_k": 5}` → answer, context and chunks |
//! | `POST` | `/clear`  | Drop the session's document and index |
//! | `GET`  | `/status` | Session state snapshot |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Every request is routed to a session chosen by the `x-session-id` header,
//! or the `default` session when the header is absent. Only a successful
//! extraction on `/upload` creates a session; `/clear` drops it again, and
//! `/query` and `/status` treat an unknown id as an empty session.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "indexing_in_progress", "message": "a document is currently being indexed" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `no_document` | 404 |
//! | `indexing_in_progress`, `superseded` | 409 |
//! | `payload_too_large` | 413 |
//! | `unsupported_format` | 415 |
//! | `extraction_failed`, `empty_document` | 422 |
//! | `embedding_failed` | 502 |
//! | `embedding_unavailable` | 503 |
//! | `invalid_config`, `dimension_mismatch`, `internal` | 500 |

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::context::ContextAssembler;
use crate::embedding::Embedder;
use crate::error::RagError;
use crate::extract;
use crate::generate::{self, Generator, GENERATION_UNAVAILABLE};
use crate::models::RetrievedChunk;
use crate::session::{SessionRegistry, SessionSettings, SessionStatus, DEFAULT_SESSION};

/// Header naming the session a request belongs to.
pub const SESSION_HEADER: &str = "x-session-id";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<SessionRegistry>,
    generator: Option<Arc<dyn Generator>>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionRegistry>, generator: Option<Arc<dyn Generator>>) -> Self {
        Self {
            sessions,
            generator,
        }
    }

    /// Build the embedder, session registry and generator from config.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = Embedder::from_config(&config.embedding)?;
        let sessions = SessionRegistry::new(embedder, SessionSettings::from_config(config));
        let generator = generate::create_generator(&config.generation)?;
        Ok(Self::new(Arc::new(sessions), generator))
    }
}

fn session_id(headers: &HeaderMap) -> &str {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_SESSION)
}

/// The application router with CORS and the upload size limit applied.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload", post(handle_upload))
        .route("/query", post(handle_query))
        .route("/clear", post(handle_clear))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    run_server_with_state(config, AppState::from_config(config)?).await
}

/// Like [`run_server`], but with caller-supplied sessions and generator.
pub async fn run_server_with_state(config: &Config, state: AppState) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(state, config.server.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "askdoc server listening");
    println!("askdoc server listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn status_for(err: &RagError) -> StatusCode {
    match err {
        RagError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        RagError::Extraction(_) | RagError::EmptyDocument => StatusCode::UNPROCESSABLE_ENTITY,
        RagError::NoDocumentIndexed => StatusCode::NOT_FOUND,
        RagError::IndexingInProgress | RagError::Superseded => StatusCode::CONFLICT,
        RagError::EmbeddingUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RagError::Embedding(_) | RagError::Generation(_) => StatusCode::BAD_GATEWAY,
        RagError::InvalidConfig(_) | RagError::DimensionMismatch { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        AppError {
            status: status_for(&err),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ POST /upload ============

fn multipart_error(e: MultipartError) -> AppError {
    let status = e.status();
    AppError {
        status,
        code: if status == StatusCode::PAYLOAD_TOO_LARGE {
            "payload_too_large".to_string()
        } else {
            "bad_request".to_string()
        },
        message: e.body_text(),
    }
}

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    status: SessionStatus,
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload: Option<(String, Option<String>, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e)),
        };
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, content_type, bytes.to_vec()));
        break;
    }

    let Some((filename, content_type, bytes)) = upload else {
        return Err(bad_request("No file part"));
    };
    if filename.trim().is_empty() {
        return Err(bad_request("No selected file"));
    }

    let name = filename.clone();
    let text = tokio::task::spawn_blocking(move || {
        extract::extract_file(&bytes, content_type.as_deref(), &name)
    })
    .await
    .map_err(|e| internal(format!("extraction task failed: {}", e)))??;

    let session = state.sessions.get_or_create(session_id(&headers)).await;
    let status = session.upload(&filename, &text).await?;
    Ok(Json(UploadResponse {
        message: format!(
            "File \"{}\" uploaded, text processed, and embeddings stored successfully!",
            filename
        ),
        status,
    }))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    response: String,
    context: String,
    chunks: Vec<RetrievedChunk>,
}

async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("No query provided"));
    }
    if req.top_k == Some(0) {
        return Err(bad_request("top_k must be >= 1"));
    }

    let session = state
        .sessions
        .get(session_id(&headers))
        .await
        .ok_or(RagError::NoDocumentIndexed)?;
    let results = session.retrieve(&req.query, req.top_k).await?;
    let bundle =
        ContextAssembler::new(session.settings().context_budget).bundle(&req.query, &results);

    let response = match generate::answer(state.generator.as_deref(), &bundle).await {
        Ok(answer) => answer,
        Err(e) => {
            tracing::warn!(session = %session.id(), error = %e, "answer generation failed");
            GENERATION_UNAVAILABLE.to_string()
        }
    };

    Ok(Json(QueryResponse {
        response,
        context: bundle.context,
        chunks: bundle.chunks,
    }))
}

// ============ POST /clear ============

#[derive(Serialize)]
struct ClearResponse {
    message: String,
}

async fn handle_clear(State(state): State<AppState>, headers: HeaderMap) -> Json<ClearResponse> {
    let id = session_id(&headers);
    if state.sessions.remove(id).await {
        tracing::debug!(session = %id, "session dropped");
    }
    Json(ClearResponse {
        message: "Document and embeddings cleared successfully! You can now upload a new document."
            .to_string(),
    })
}

// ============ GET /status ============

async fn handle_status(State(state): State<AppState>, headers: HeaderMap) -> Json<SessionStatus> {
    match state.sessions.get(session_id(&headers)).await {
        Some(session) => Json(session.status().await),
        None => Json(SessionStatus::empty()),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            status_for(&RagError::IndexingInProgress),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&RagError::NoDocumentIndexed),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&RagError::UnsupportedFormat("image/png".into())),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            status_for(&RagError::EmbeddingUnavailable {
                attempts: 3,
                reason: "HTTP 503".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn app_error_keeps_code() {
        let err = AppError::from(RagError::EmptyDocument);
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, "empty_document");
    }
}
