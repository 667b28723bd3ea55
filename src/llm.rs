//! Chat completion providers.
//!
//! Defines the [`ChatProvider`] trait and its implementations:
//! - **[`DisabledProvider`]**: always errors; used when no LLM is configured.
//! - **[`GeminiProvider`]**: Google Gemini `generateContent`, and
//!   `streamGenerateContent` for streaming.
//! - **[`GroqProvider`]**: Groq's OpenAI-compatible chat completions.
//!
//! Use [`create_provider`] to pick one from `[llm]`:
//!
//! ```rust,no_run
//! # use ragdesk::config::LlmConfig;
//! # use ragdesk::llm::create_provider;
//! let provider = create_provider(&LlmConfig::default()).unwrap();
//! assert_eq!(provider.name(), "disabled");
//! ```
//!
//! Providers do not retry. A non-2xx response surfaces its status and body.
//!
//! # Streaming
//!
//! [`ChatProvider::stream`] yields the reply as text chunks in arrival
//! order. Both hosted providers answer with server-sent events; only the
//! `data:` lines are read. The default implementation yields the whole
//! [`ChatProvider::complete`] reply as one chunk.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use ragdesk_core::validate::{check_api_key, ApiKeyKind};

use crate::config::LlmConfig;

pub const GEMINI_KEY_ENV: &str = "GEMINI_API_KEY";
pub const GROQ_KEY_ENV: &str = "GROQ_API_KEY";

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const GROQ_BASE_URL: &str = "https://api.groq.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider identifier (`"gemini"`, `"groq"`, `"disabled"`).
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Completes `history` (oldest first) under an optional system prompt.
    async fn complete(&self, system: Option<&str>, history: &[ChatMessage]) -> Result<String>;

    /// Like [`complete`](Self::complete), but yields the reply in chunks.
    ///
    /// Errors opening the stream are returned directly; errors after that
    /// end the stream with an `Err` item.
    async fn stream(&self, system: Option<&str>, history: &[ChatMessage]) -> Result<TextStream> {
        let text = self.complete(system, history).await?;
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }
}

/// Reply chunks in arrival order.
pub type TextStream = BoxStream<'static, Result<String>>;

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl ChatProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    fn model(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: Option<&str>, _history: &[ChatMessage]) -> Result<String> {
        bail!("No language model is configured (llm.provider = \"disabled\")")
    }
}

// ============ Gemini Provider ============

/// Calls `POST /v1beta/models/{model}:generateContent`.
pub struct GeminiProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(config: &LlmConfig, api_key: &str) -> Result<Self> {
        check_api_key(ApiKeyKind::Gemini, api_key)?;
        Ok(Self {
            http: build_client(config)?,
            base_url: base_url(config, GEMINI_BASE_URL),
            model: require_model(config)?,
            api_key: api_key.trim().to_string(),
        })
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: Option<&str>, history: &[ChatMessage]) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = gemini_body(system, history);
        let resp = self
            .http
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await
            .context("Gemini request failed")?;
        let json = read_json(resp, "Gemini").await?;
        parse_gemini_response(&json)
    }

    async fn stream(&self, system: Option<&str>, history: &[ChatMessage]) -> Result<TextStream> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent",
            self.base_url, self.model
        );
        let body = gemini_body(system, history);
        let resp = self
            .http
            .post(&url)
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .context("Gemini request failed")?;
        let resp = check_status(resp, "Gemini").await?;

        let mut events = Box::pin(sse_data(resp.bytes_stream()));
        Ok(async_stream::try_stream! {
            while let Some(data) = events.next().await {
                let data = data?;
                let json: Value = serde_json::from_str(&data)
                    .context("Invalid Gemini stream chunk")?;
                if let Some(err) = json.get("error") {
                    Err::<(), _>(anyhow::anyhow!("Gemini API error: {}", err))?;
                }
                let text = gemini_chunk_text(&json);
                if !text.is_empty() {
                    yield text;
                }
            }
        }
        .boxed())
    }
}

fn gemini_body(system: Option<&str>, history: &[ChatMessage]) -> Value {
    let contents: Vec<Value> = history
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            json!({ "role": role, "parts": [{ "text": m.content }] })
        })
        .collect();
    let mut body = json!({ "contents": contents });
    if let Some(s) = system {
        body["systemInstruction"] = json!({ "parts": [{ "text": s }] });
    }
    body
}

/// Text of one streamed candidate; empty when the chunk carries none.
fn gemini_chunk_text(json: &Value) -> String {
    json.pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_gemini_response(json: &Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing candidates"))?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    Ok(text)
}

// ============ Groq Provider ============

/// Calls the OpenAI-compatible `POST /openai/v1/chat/completions`.
pub struct GroqProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GroqProvider {
    pub fn new(config: &LlmConfig, api_key: &str) -> Result<Self> {
        check_api_key(ApiKeyKind::Groq, api_key)?;
        Ok(Self {
            http: build_client(config)?,
            base_url: base_url(config, GROQ_BASE_URL),
            model: require_model(config)?,
            api_key: api_key.trim().to_string(),
        })
    }
}

#[async_trait]
impl ChatProvider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: Option<&str>, history: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/openai/v1/chat/completions", self.base_url);
        let body = openai_body(&self.model, system, history);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Groq request failed")?;
        let json = read_json(resp, "Groq").await?;
        json.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Groq response: missing choices"))
    }

    async fn stream(&self, system: Option<&str>, history: &[ChatMessage]) -> Result<TextStream> {
        let url = format!("{}/openai/v1/chat/completions", self.base_url);
        let mut body = openai_body(&self.model, system, history);
        body["stream"] = json!(true);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Groq request failed")?;
        let resp = check_status(resp, "Groq").await?;

        let mut events = Box::pin(sse_data(resp.bytes_stream()));
        Ok(async_stream::try_stream! {
            while let Some(data) = events.next().await {
                let data = data?;
                if data == "[DONE]" {
                    break;
                }
                let json: Value = serde_json::from_str(&data)
                    .context("Invalid Groq stream chunk")?;
                if let Some(err) = json.get("error") {
                    Err::<(), _>(anyhow::anyhow!("Groq API error: {}", err))?;
                }
                let text = json
                    .pointer("/choices/0/delta/content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if !text.is_empty() {
                    yield text.to_string();
                }
            }
        }
        .boxed())
    }
}

fn openai_body(model: &str, system: Option<&str>, history: &[ChatMessage]) -> Value {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if let Some(s) = system {
        messages.push(json!({ "role": "system", "content": s }));
    }
    messages.extend(history.iter().map(|m| json!(m)));
    json!({ "model": model, "messages": messages })
}

// ============ Shared ============

fn build_client(config: &LlmConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

fn base_url(config: &LlmConfig, default: &str) -> String {
    config
        .base_url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

fn require_model(config: &LlmConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("llm.model required for provider '{}'", config.provider))
}

async fn check_status(resp: reqwest::Response, provider: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("{} API error {}: {}", provider, status, body);
    }
    Ok(resp)
}

async fn read_json(resp: reqwest::Response, provider: &str) -> Result<Value> {
    check_status(resp, provider)
        .await?
        .json()
        .await
        .with_context(|| format!("Invalid {} response body", provider))
}

/// Payloads of the `data:` lines of a server-sent event body.
///
/// Lines may be split across network chunks. Other fields (`event:`,
/// `id:`, comments) and blank separators are skipped.
fn sse_data<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.context("Event stream interrupted")?;
            buf.extend_from_slice(chunk.as_ref());
            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                if let Some(data) = data_field(&line) {
                    yield data;
                }
            }
        }
        if let Some(data) = data_field(&buf) {
            yield data;
        }
    }
}

fn data_field(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    (!data.is_empty()).then(|| data.to_string())
}

/// Builds the provider named by `config.provider`, reading its key from
/// the environment.
///
/// | Config Value | Provider | Key |
/// |-------------|----------|-----|
/// | `"disabled"` | [`DisabledProvider`] | none |
/// | `"gemini"` | [`GeminiProvider`] | `GEMINI_API_KEY` |
/// | `"groq"` | [`GroqProvider`] | `GROQ_API_KEY` |
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn ChatProvider>> {
    let key = |var: &str| std::env::var(var).unwrap_or_default();
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "gemini" => Ok(Box::new(GeminiProvider::new(config, &key(GEMINI_KEY_ENV))?)),
        "groq" => Ok(Box::new(GroqProvider::new(config, &key(GROQ_KEY_ENV))?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
