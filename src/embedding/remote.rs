//! HTTP embedding providers: OpenAI, Ollama and Gemini.
//!
//! Each provider makes a single request per [`EmbeddingProvider::embed_batch`]
//! call and classifies the outcome; retry and backoff live in
//! [`Embedder`](super::Embedder).
//!
//! - network errors, HTTP 429 and 5xx → [`ProviderError::Transient`]
//! - any other 4xx, or a response that does not parse → [`ProviderError::Permanent`]

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};

use super::{EmbedKind, EmbeddingProvider, ProviderError};
use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

type ProviderResult<T> = std::result::Result<T, ProviderError>;

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";
const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| RagError::InvalidConfig(format!("failed to build HTTP client: {}", e)))
}

fn trim_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Send a request and return the JSON body of a 2xx response.
async fn send_json(
    provider: &str,
    request: RequestBuilder,
) -> ProviderResult<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::Transient(format!("{} connection error: {}", provider, e)))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("{} returned invalid JSON: {}", provider, e)));
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_status(provider, status, &body))
}

/// Map a non-success HTTP status onto a retry decision.
pub(crate) fn classify_status(provider: &str, status: StatusCode, body: &str) -> ProviderError {
    let message = format!("{} API error {}: {}", provider, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transient(message)
    } else {
        ProviderError::Permanent(message)
    }
}

fn parse_vector(provider: &str, value: &serde_json::Value) -> ProviderResult<Vec<f32>> {
    let items = value.as_array().ok_or_else(|| {
        ProviderError::Permanent(format!("Invalid {} response: embedding is not an array", provider))
    })?;
    items
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                ProviderError::Permanent(format!("Invalid {} response: non-numeric value", provider))
            })
        })
        .collect()
}

// ============ OpenAI ============

/// `POST /v1/embeddings`. Needs `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::InvalidConfig("embedding.model required for OpenAI provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            RagError::InvalidConfig("embedding.dims required for OpenAI provider".to_string())
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::InvalidConfig("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let base_url = config.url.as_deref().unwrap_or(OPENAI_URL);
        Ok(Self::with_endpoint(http_client(config)?, base_url, api_key, model, dims))
    }

    /// Point at an explicit endpoint, bypassing config and environment.
    pub fn with_endpoint(
        client: reqwest::Client,
        base_url: &str,
        api_key: String,
        model: String,
        dims: usize,
    ) -> Self {
        Self {
            client,
            base_url: trim_url(base_url),
            api_key,
            model,
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(
        &self,
        texts: &[String],
        _kind: EmbedKind,
    ) -> ProviderResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);
        let json = send_json("OpenAI", request).await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
pub(crate) fn parse_openai_response(json: &serde_json::Value) -> ProviderResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            ProviderError::Permanent("Invalid OpenAI response: missing data array".to_string())
        })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item.get("embedding").ok_or_else(|| {
            ProviderError::Permanent("Invalid OpenAI response: missing embedding".to_string())
        })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, parse_vector("OpenAI", embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// `POST /api/embed` on a local Ollama instance.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::InvalidConfig("embedding.model required for Ollama provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            RagError::InvalidConfig("embedding.dims required for Ollama provider".to_string())
        })?;
        Ok(Self {
            client: http_client(config)?,
            base_url: trim_url(config.url.as_deref().unwrap_or(OLLAMA_URL)),
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(
        &self,
        texts: &[String],
        _kind: EmbedKind,
    ) -> ProviderResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&body);
        let json = send_json("Ollama", request).await.map_err(|e| match e {
            ProviderError::Transient(m) if m.contains("connection error") => ProviderError::Transient(
                format!("{} (is Ollama running at {}?)", m, self.base_url),
            ),
            other => other,
        })?;
        parse_ollama_response(&json)
    }
}

pub(crate) fn parse_ollama_response(json: &serde_json::Value) -> ProviderResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            ProviderError::Permanent(
                "Invalid Ollama response: missing embeddings array".to_string(),
            )
        })?;
    embeddings
        .iter()
        .map(|e| parse_vector("Ollama", e))
        .collect()
}

// ============ Gemini ============

const GEMINI_DEFAULT_MODEL: &str = "embedding-001";
const GEMINI_DEFAULT_DIMS: usize = 768;

/// Google Generative Language `batchEmbedContents`. Needs `GOOGLE_API_KEY`.
///
/// Documents are embedded with task type `RETRIEVAL_DOCUMENT`, queries with
/// `RETRIEVAL_QUERY`.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl GeminiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY").map_err(|_| {
            RagError::InvalidConfig("GOOGLE_API_KEY environment variable not set".to_string())
        })?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_string());
        Ok(Self {
            client: http_client(config)?,
            base_url: trim_url(config.url.as_deref().unwrap_or(GEMINI_URL)),
            api_key,
            model,
            dims: config.dims.unwrap_or(GEMINI_DEFAULT_DIMS),
        })
    }
}

fn gemini_task_type(kind: EmbedKind) -> &'static str {
    match kind {
        EmbedKind::Document => "RETRIEVAL_DOCUMENT",
        EmbedKind::Query => "RETRIEVAL_QUERY",
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(
        &self,
        texts: &[String],
        kind: EmbedKind,
    ) -> ProviderResult<Vec<Vec<f32>>> {
        let model = format!("models/{}", self.model);
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": model,
                    "content": { "parts": [{ "text": text }] },
                    "taskType": gemini_task_type(kind),
                })
            })
            .collect();
        let request = self
            .client
            .post(format!("{}/v1beta/{}:batchEmbedContents", self.base_url, model))
            .header("x-goog-api-key", &self.api_key)
            .json(&serde_json::json!({ "requests": requests }));
        let json = send_json("Gemini", request).await?;
        parse_gemini_response(&json)
    }
}

pub(crate) fn parse_gemini_response(json: &serde_json::Value) -> ProviderResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            ProviderError::Permanent(
                "Invalid Gemini response: missing embeddings array".to_string(),
            )
        })?;
    embeddings
        .iter()
        .map(|e| {
            let values = e.get("values").ok_or_else(|| {
                ProviderError::Permanent("Invalid Gemini response: missing values".to_string())
            })?;
            parse_vector("Gemini", values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status("OpenAI", StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            classify_status("OpenAI", StatusCode::BAD_GATEWAY, ""),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            classify_status("OpenAI", StatusCode::UNAUTHORIZED, "bad key"),
            ProviderError::Permanent(m) if m.contains("bad key")
        ));
        assert!(matches!(
            classify_status("OpenAI", StatusCode::BAD_REQUEST, ""),
            ProviderError::Permanent(_)
        ));
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let body = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] },
            ]
        });
        let vectors = parse_openai_response(&body).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_malformed_is_permanent() {
        assert!(matches!(
            parse_openai_response(&json!({ "object": "list" })),
            Err(ProviderError::Permanent(_))
        ));
        assert!(matches!(
            parse_openai_response(&json!({ "data": [{ "embedding": ["x"] }] })),
            Err(ProviderError::Permanent(_))
        ));
    }

    #[test]
    fn test_parse_ollama() {
        let body = json!({ "embeddings": [[0.5, 0.25], [1.0, 2.0]] });
        let vectors = parse_ollama_response(&body).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![1.0, 2.0]);
    }

    #[test]
    fn test_parse_gemini() {
        let body = json!({ "embeddings": [{ "values": [0.1, 0.2, 0.3] }] });
        let vectors = parse_gemini_response(&body).unwrap();
        assert_eq!(vectors.len(), 1);
        assert!((vectors[0][2] - 0.3).abs() < 1e-6);
        assert!(parse_gemini_response(&json!({})).is_err());
    }

    #[test]
    fn test_gemini_task_types() {
        assert_eq!(gemini_task_type(EmbedKind::Document), "RETRIEVAL_DOCUMENT");
        assert_eq!(gemini_task_type(EmbedKind::Query), "RETRIEVAL_QUERY");
    }

    /// Serve `/v1/embeddings` with a fixed status and body on an ephemeral port.
    async fn mock_openai(status: StatusCode, body: serde_json::Value) -> String {
        use axum::{routing::post, Json, Router};

        let app = Router::new().route(
            "/v1/embeddings",
            post(move || {
                let body = body.clone();
                async move { (status, Json(body)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn openai_at(base_url: &str) -> OpenAIProvider {
        OpenAIProvider::with_endpoint(
            reqwest::Client::new(),
            base_url,
            "sk-test".to_string(),
            "text-embedding-3-small".to_string(),
            2,
        )
    }

    #[tokio::test]
    async fn test_openai_round_trip_over_http() {
        let url = mock_openai(
            StatusCode::OK,
            json!({ "data": [{ "index": 0, "embedding": [0.6, 0.8] }] }),
        )
        .await;
        let vectors = openai_at(&url)
            .embed_batch(&["hello".to_string()], EmbedKind::Document)
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.6, 0.8]]);
    }

    #[tokio::test]
    async fn test_openai_rate_limit_is_transient() {
        let url = mock_openai(
            StatusCode::TOO_MANY_REQUESTS,
            json!({ "error": { "message": "slow down" } }),
        )
        .await;
        let err = openai_at(&url)
            .embed_batch(&["hello".to_string()], EmbedKind::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transient(ref m) if m.contains("429")));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = openai_at(&format!("http://{}", addr))
            .embed_batch(&["hello".to_string()], EmbedKind::Query)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transient(_)));
    }

    #[test]
    fn test_openai_requires_model() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            OpenAIProvider::new(&config),
            Err(RagError::InvalidConfig(_))
        ));
    }
}
