//! Language-model collaborator abstraction and the Gemini implementation.
//!
//! Defines the [`LanguageModel`] trait covering the three operations the
//! pipelines consume — structured completion (enrichment), embedding, and
//! text completion (answer synthesis) — and [`GeminiClient`], which calls
//! the Google Generative Language API over HTTP.
//!
//! # Error classification
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → transient, retried
//! - HTTP 4xx (client error, not 429) → terminal, fail immediately
//! - Network errors and timeouts → transient, retried
//! - A successful response with an unusable payload → terminal; for
//!   structured completions the enrichment engine treats this as a schema
//!   mismatch and re-prompts once

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmConfig;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Error, Debug)]
pub enum LlmError {
    /// Network failure or timeout before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status from the API.
    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },

    /// A successful response whose payload could not be used.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Whether the failure is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// The three logical operations the pipelines consume from a language model.
///
/// All three are treated as potentially slow, rate-limited, and transiently
/// failing; callers wrap them in the shared retry policy.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a prompt that requests a JSON payload, returning the parsed
    /// value.
    async fn complete_structured(&self, prompt: &str) -> Result<Value, LlmError>;

    /// Embed a text into a fixed-length vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// Complete a prompt with free-form text.
    async fn complete_text(&self, prompt: &str) -> Result<String, LlmError>;

    /// Returns the completion model identifier.
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
}

/// Client for the Google Generative Language API.
///
/// Uses `generateContent` for completions (with JSON response mode for
/// structured output) and `embedContent` for embeddings. Requires the
/// `GEMINI_API_KEY` environment variable.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    embedding_model: String,
    dims: usize,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_key,
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            dims: config.dims,
        })
    }

    async fn generate(&self, prompt: &str, json_mode: bool) -> Result<String, LlmError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            GEMINI_BASE_URL, self.model, self.api_key
        );

        let mut body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });
        if json_mode {
            body["generationConfig"] = serde_json::json!({
                "response_mime_type": "application/json",
            });
        }

        let json = self.post_json(&url, &body).await?;
        extract_candidate_text(&json)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, LlmError> {
        let resp = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                message,
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("response is not JSON: {}", e)))
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn complete_structured(&self, prompt: &str) -> Result<Value, LlmError> {
        let text = self.generate(prompt, true).await?;
        serde_json::from_str(&text)
            .map_err(|e| LlmError::InvalidResponse(format!("payload is not JSON: {}", e)))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            GEMINI_BASE_URL, self.embedding_model, self.api_key
        );
        let body = serde_json::json!({
            "content": { "parts": [{ "text": text }] },
        });

        let json = self.post_json(&url, &body).await?;
        let vector = parse_embedding_response(&json)?;
        if vector.len() != self.dims {
            return Err(LlmError::InvalidResponse(format!(
                "expected {} dims, got {}",
                self.dims,
                vector.len()
            )));
        }
        Ok(vector)
    }

    async fn complete_text(&self, prompt: &str) -> Result<String, LlmError> {
        self.generate(prompt, false).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Extract `candidates[0].content.parts[0].text` from a generateContent
/// response.
fn extract_candidate_text(json: &Value) -> Result<String, LlmError> {
    json.get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.pointer("/content/parts/0/text"))
        .and_then(|t| t.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| LlmError::InvalidResponse("missing candidate text".to_string()))
}

/// Extract `embedding.values` from an embedContent response.
fn parse_embedding_response(json: &Value) -> Result<Vec<f32>, LlmError> {
    let values = json
        .pointer("/embedding/values")
        .and_then(|v| v.as_array())
        .ok_or_else(|| LlmError::InvalidResponse("missing embedding values".to_string()))?;

    Ok(values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}
