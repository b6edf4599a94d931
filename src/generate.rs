//! Answer generation from a query and its grounded context.
//!
//! The model only ever sees the assembled context string and the question.
//! When retrieval found nothing, [`answer`] replies with
//! [`NO_RELEVANT_INFO`] without calling the model; when generation is
//! disabled it returns the context itself.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{RagError, Result};
use crate::models::ContextBundle;

/// What the model is told to say when the context lacks the answer.
pub const NOT_IN_CONTEXT: &str = "I cannot find the answer in the provided document.";

/// Reply when retrieval produced no context at all.
pub const NO_RELEVANT_INFO: &str =
    "I cannot find any relevant information for that question in the documents.";

/// Reply shown when the model call itself fails.
pub const GENERATION_UNAVAILABLE: &str = "Sorry, I am unable to generate a response at this time.";

/// Build the grounded prompt.
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "You are a helpful assistant. Answer the user's question based on the provided context only. \
         If the answer is not in the context, say '{}'\n\n\
         Context: {}\n\n\
         Question: {}",
        NOT_IN_CONTEXT, context, query
    )
}

/// Turns (query, context) into prose.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, query: &str, context: &str) -> Result<String>;
}

/// Answer `bundle.query` from `bundle.context`.
pub async fn answer(generator: Option<&dyn Generator>, bundle: &ContextBundle) -> Result<String> {
    if !bundle.has_context() {
        return Ok(NO_RELEVANT_INFO.to_string());
    }
    match generator {
        Some(generator) => generator.generate(&bundle.query, &bundle.context).await,
        None => Ok(bundle.context.clone()),
    }
}

/// Create the configured generator, or `None` when `provider = "disabled"`.
pub fn create_generator(config: &GenerationConfig) -> Result<Option<Arc<dyn Generator>>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| RagError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

    match config.provider.as_str() {
        "disabled" => Ok(None),
        "gemini" => {
            let api_key = std::env::var("GOOGLE_API_KEY").map_err(|_| {
                RagError::InvalidConfig("GOOGLE_API_KEY environment variable not set".to_string())
            })?;
            Ok(Some(Arc::new(GeminiGenerator {
                client,
                base_url: base_url(config, "https://generativelanguage.googleapis.com"),
                api_key,
                model: model(config, "gemini-1.5-flash"),
            })))
        }
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                RagError::InvalidConfig("OPENAI_API_KEY environment variable not set".to_string())
            })?;
            Ok(Some(Arc::new(OpenAIGenerator {
                client,
                base_url: base_url(config, "https://api.openai.com"),
                api_key,
                model: model(config, "gpt-4o-mini"),
            })))
        }
        "ollama" => Ok(Some(Arc::new(OllamaGenerator {
            client,
            base_url: base_url(config, "http://localhost:11434"),
            model: model(config, "llama3.2"),
        }))),
        other => Err(RagError::InvalidConfig(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

fn base_url(config: &GenerationConfig, default: &str) -> String {
    config
        .url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

fn model(config: &GenerationConfig, default: &str) -> String {
    config.model.clone().unwrap_or_else(|| default.to_string())
}

async fn post_json(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| RagError::Generation(format!("{} connection error: {}", provider, e)))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RagError::Generation(format!(
            "{} API error {}: {}",
            provider, status, body
        )));
    }
    response
        .json()
        .await
        .map_err(|e| RagError::Generation(format!("{} returned invalid JSON: {}", provider, e)))
}

fn missing(provider: &str, what: &str) -> RagError {
    RagError::Generation(format!("Invalid {} response: missing {}", provider, what))
}

pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, query: &str, context: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": build_prompt(query, context) }] }]
        });
        let request = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        parse_gemini_reply(&post_json("Gemini", request).await?)
    }
}

fn parse_gemini_reply(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| missing("Gemini", "candidates"))?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Ok(text.trim().to_string())
}

pub struct OpenAIGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, query: &str, context: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": build_prompt(query, context) }],
        });
        let request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);
        let json = post_json("OpenAI", request).await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.trim().to_string())
            .ok_or_else(|| missing("OpenAI", "choices"))
    }
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, query: &str, context: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": build_prompt(query, context),
            "stream": false,
        });
        let request = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body);
        let json = post_json("Ollama", request).await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|r| r.trim().to_string())
            .ok_or_else(|| missing("Ollama", "response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NO_CONTEXT_SENTINEL;

    struct Echo;

    #[async_trait]
    impl Generator for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn generate(&self, query: &str, context: &str) -> Result<String> {
            Ok(format!("{} | {}", query, context))
        }
    }

    fn bundle(context: &str) -> ContextBundle {
        ContextBundle {
            query: "q".to_string(),
            context: context.to_string(),
            chunks: Vec::new(),
        }
    }

    #[test]
    fn prompt_contains_context_and_question() {
        let prompt = build_prompt("What is X?", "X is a letter.");
        assert!(prompt.contains("Context: X is a letter."));
        assert!(prompt.ends_with("Question: What is X?"));
        assert!(prompt.contains(NOT_IN_CONTEXT));
    }

    #[tokio::test]
    async fn sentinel_context_skips_model() {
        let reply = answer(Some(&Echo), &bundle(NO_CONTEXT_SENTINEL))
            .await
            .unwrap();
        assert_eq!(reply, NO_RELEVANT_INFO);
    }

    #[tokio::test]
    async fn generator_sees_query_and_context() {
        assert_eq!(answer(Some(&Echo), &bundle("ctx")).await.unwrap(), "q | ctx");
        assert_eq!(answer(None, &bundle("ctx")).await.unwrap(), "ctx");
    }

    #[test]
    fn disabled_is_none() {
        assert!(create_generator(&GenerationConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn parse_gemini_joins_parts() {
        let json = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "there." }] } }]
        });
        assert_eq!(parse_gemini_reply(&json).unwrap(), "Hello there.");
        assert!(parse_gemini_reply(&serde_json::json!({})).is_err());
    }
}
