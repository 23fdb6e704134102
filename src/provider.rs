//! Provider gateway: a uniform call interface over the LLM back-ends.
//!
//! Two backends implement [`LlmProvider`]:
//! - **[`LocalProvider`]** — an Ollama-shaped service with `/api/chat`,
//!   `/api/generate`, and `/api/embeddings` endpoints.
//! - **[`ExternalProvider`]** — an OpenAI-shaped service with
//!   `/v1/chat/completions` and `/v1/embeddings`, authenticated via the
//!   `FORMFILL_API_KEY` environment variable.
//!
//! Every call is non-streaming (`stream: false` is enforced in the request
//! structs) and carries `Content-Type: application/json`.
//!
//! # Response robustness
//!
//! Providers emit drifting shapes, so parsing is deliberately forgiving:
//! direct JSON parse first, then the first balanced `{…}` span; chat content
//! is synthesised from `message.content`, `content`, `text`, or `response`;
//! embeddings must carry a numeric `embedding` array and are rejected
//! otherwise.
//!
//! Errors are classified ([`ProviderError`]) for the answer engine's
//! fallback path. No retry happens at this layer; callers decide.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;

use crate::config::{ChatConfig, EmbeddingConfig};
use crate::models::ChatMessage;
use crate::stop::StopToken;

/// Environment variable holding the external provider API key.
pub const EXTERNAL_API_KEY_VAR: &str = "FORMFILL_API_KEY";

const LOCAL_DEFAULT_URL: &str = "http://127.0.0.1:11434";
const EXTERNAL_DEFAULT_URL: &str = "https://api.openai.com";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request timed out")]
    Timeout,

    #[error("Provider not reachable: {0}")]
    Network(String),

    #[error("Provider returned an unusable response: {0}")]
    Schema(String),

    #[error("Provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Call abandoned by stop signal")]
    Stopped,
}

/// Uniform interface over chat, generate, and embedding endpoints.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend identifier for logs and the `providers` command.
    fn name(&self) -> &str;

    /// Single-turn or multi-turn chat completion. Returns the raw assistant text.
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, ProviderError>;

    /// Plain prompt completion.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ProviderError>;

    /// Dense embedding for one text.
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;
}

/// Race a chat call against the stop token; an abandoned call resolves as
/// [`ProviderError::Stopped`] and its eventual result is dropped.
pub async fn chat_with_stop(
    provider: &dyn LlmProvider,
    model: &str,
    messages: &[ChatMessage],
    temperature: f32,
    stop: &StopToken,
) -> Result<String, ProviderError> {
    tokio::select! {
        res = provider.chat(model, messages, temperature) => res,
        _ = stop.cancelled() => Err(ProviderError::Stopped),
    }
}

/// Construct the chat backend named in the configuration.
pub fn create_chat_provider(config: &ChatConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalProvider::new(
            config.base_url.as_deref(),
            config.timeout_secs,
        )?)),
        "external" => Ok(Arc::new(ExternalProvider::new(
            config.base_url.as_deref(),
            config.timeout_secs,
            config.max_tokens,
        )?)),
        other => anyhow::bail!("Unknown chat provider: '{}'. Must be local or external.", other),
    }
}

/// Construct the embedding backend named in the configuration.
pub fn create_embedding_provider(config: &EmbeddingConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalProvider::new(
            config.base_url.as_deref(),
            config.timeout_secs,
        )?)),
        "external" => Ok(Arc::new(ExternalProvider::new(
            config.base_url.as_deref(),
            config.timeout_secs,
            None,
        )?)),
        "disabled" => anyhow::bail!("Embedding provider is disabled"),
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, or external.",
            other
        ),
    }
}

// ============ Local (Ollama-shaped) provider ============

#[derive(Debug, Serialize)]
struct LocalChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: LocalOptions,
}

#[derive(Debug, Serialize)]
struct LocalOptions {
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct LocalGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct LocalEmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Client for a local Ollama-shaped generate/chat/embeddings service.
pub struct LocalProvider {
    base_url: String,
    client: reqwest::Client,
}

impl LocalProvider {
    pub fn new(base_url: Option<&str>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.unwrap_or(LOCAL_DEFAULT_URL).trim_end_matches('/').to_string(),
            client,
        })
    }

    /// List model names the service reports (`GET /api/tags`).
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(classify_error)?;
        let value = read_json_body(resp).await?;
        let models = value
            .get("models")
            .and_then(|m| m.as_array())
            .ok_or_else(|| ProviderError::Schema("missing models array".to_string()))?;
        Ok(models
            .iter()
            .filter_map(|m| m.get("name").and_then(|n| n.as_str()).map(String::from))
            .collect())
    }
}

#[async_trait]
impl LlmProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = LocalChatRequest {
            model,
            messages,
            stream: false,
            options: LocalOptions { temperature },
        };
        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_error)?;
        let value = read_json_body(resp).await?;
        chat_content(&value)
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = LocalGenerateRequest {
            model,
            prompt,
            stream: false,
        };
        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_error)?;
        let value = read_json_body(resp).await?;
        generate_content(&value)
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = LocalEmbeddingsRequest {
            model,
            prompt: text,
            stream: false,
        };
        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_error)?;
        let value = read_json_body(resp).await?;
        embedding_vector(&value)
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(&self.base_url)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

// ============ External (OpenAI-shaped) provider ============

#[derive(Debug, Serialize)]
struct ExternalChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ExternalEmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

/// Client for an external OpenAI-shaped chat/completions service.
pub struct ExternalProvider {
    base_url: String,
    api_key: String,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl ExternalProvider {
    pub fn new(
        base_url: Option<&str>,
        timeout_secs: u64,
        max_tokens: Option<u32>,
    ) -> Result<Self> {
        let api_key = std::env::var(EXTERNAL_API_KEY_VAR)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", EXTERNAL_API_KEY_VAR))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url
                .unwrap_or(EXTERNAL_DEFAULT_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            max_tokens,
            client,
        })
    }
}

#[async_trait]
impl LlmProvider for ExternalProvider {
    fn name(&self) -> &str {
        "external"
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ExternalChatRequest {
            model,
            messages,
            temperature,
            max_tokens: self.max_tokens,
        };
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_error)?;
        let value = read_json_body(resp).await?;
        external_chat_content(&value)
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ProviderError> {
        // The external service has no generate endpoint; a single user turn
        // through chat/completions is equivalent.
        let messages = [ChatMessage::user(prompt)];
        self.chat(model, &messages, 0.0).await
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = ExternalEmbeddingsRequest { model, input: text };
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_error)?;
        let value = read_json_body(resp).await?;
        // {data: [{embedding: [...]}]}
        let first = value
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .ok_or_else(|| ProviderError::Schema("missing data array".to_string()))?;
        embedding_vector(first)
    }

    async fn is_available(&self) -> bool {
        // No cheap unauthenticated probe; a constructed client is assumed live.
        true
    }
}

// ============ Error classification ============

fn classify_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        // Connection refusals and mid-body failures both count as network
        // errors for the fallback path.
        ProviderError::Network(e.to_string())
    }
}

async fn read_json_body(resp: reqwest::Response) -> Result<Value, ProviderError> {
    let status = resp.status();
    let text = resp.text().await.map_err(classify_error)?;

    if !status.is_success() {
        return Err(ProviderError::Http {
            status: status.as_u16(),
            message: text,
        });
    }

    parse_json_lenient(&text)
}

// ============ Robust response parsing ============

/// Direct JSON parse first; on failure, extract and parse the first balanced
/// `{…}` span. Partial data inside the span is accepted.
pub fn parse_json_lenient(raw: &str) -> Result<Value, ProviderError> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return Ok(value);
    }
    let span = extract_first_json(raw)
        .ok_or_else(|| ProviderError::Schema("no JSON object in response".to_string()))?;
    serde_json::from_str(span).map_err(|e| ProviderError::Schema(e.to_string()))
}

/// Locate the first balanced `{…}` span, respecting string literals.
pub fn extract_first_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let bytes = raw.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract assistant text from a chat-shaped response: `message.content`
/// first, then the `content` / `text` / `response` synthesis fallbacks.
pub fn chat_content(value: &Value) -> Result<String, ProviderError> {
    if let Some(content) = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        return Ok(content.to_string());
    }
    synthesize_content(value)
        .ok_or_else(|| ProviderError::Schema("chat response has no content".to_string()))
}

/// Extract text from a generate-shaped response: `response` first, then the
/// same synthesis fallbacks.
pub fn generate_content(value: &Value) -> Result<String, ProviderError> {
    if let Some(response) = value.get("response").and_then(|r| r.as_str()) {
        return Ok(response.to_string());
    }
    synthesize_content(value)
        .ok_or_else(|| ProviderError::Schema("generate response has no content".to_string()))
}

/// External chat/completions shape: `choices[0].message.content`, falling
/// back to the same synthesis as the local backend.
pub fn external_chat_content(value: &Value) -> Result<String, ProviderError> {
    if let Some(content) = value
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        return Ok(content.to_string());
    }
    synthesize_content(value)
        .ok_or_else(|| ProviderError::Schema("chat response has no choices".to_string()))
}

fn synthesize_content(value: &Value) -> Option<String> {
    for field in ["content", "text", "response"] {
        if let Some(s) = value.get(field).and_then(|v| v.as_str()) {
            return Some(s.to_string());
        }
    }
    None
}

/// Embeddings must carry a numeric `embedding` array; anything else is a
/// schema error.
pub fn embedding_vector(value: &Value) -> Result<Vec<f32>, ProviderError> {
    let array = value
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ProviderError::Schema("missing embedding array".to_string()))?;

    let mut vec = Vec::with_capacity(array.len());
    for item in array {
        let n = item
            .as_f64()
            .ok_or_else(|| ProviderError::Schema("non-numeric embedding element".to_string()))?;
        vec.push(n as f32);
    }
    Ok(vec)
}
