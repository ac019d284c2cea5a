//! Text generation capability and an OpenAI-compatible chat client.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use docqa_core::{Error, Settings};

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },
    #[error("model not found: {model}")]
    ModelNotFound { model: String },
    #[error("rate limited: {message}")]
    RateLimited { message: String },
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("server error ({status}): {message}")]
    ServerError { message: String, status: u16 },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("could not parse response: {message}")]
    Parse { message: String },
    #[error("{message}")]
    Other { message: String },
}

impl From<GenerationError> for Error {
    fn from(e: GenerationError) -> Self {
        Error::Generation(e.to_string())
    }
}

/// Map a non-success HTTP status and body to a `GenerationError`.
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> GenerationError {
    match status {
        401 => GenerationError::AuthenticationFailed { message: format!("{provider}: Invalid API key") },
        403 => GenerationError::AuthenticationFailed { message: format!("{provider}: Access denied") },
        404 => GenerationError::ModelNotFound { model: body.to_string() },
        429 => GenerationError::RateLimited { message: body.to_string() },
        400 => GenerationError::InvalidRequest { message: body.to_string() },
        500..=599 => GenerationError::ServerError { message: body.to_string(), status },
        _ => GenerationError::Other { message: format!("HTTP {status}: {body}") },
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Transport-level ceiling; the orchestrator applies its own deadline too.
    pub request_timeout: Duration,
}

impl LlmSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_key: settings.api_key().map(str::to_string),
            base_url: settings.openai_base_url.clone(),
            model: settings.model_name.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            request_timeout: settings.generation_timeout(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

pub struct OpenAiGenerator {
    client: reqwest::Client,
    settings: LlmSettings,
    api_key: String,
}

impl OpenAiGenerator {
    pub fn new(settings: LlmSettings) -> docqa_core::Result<Self> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::MissingCredential("openai".into()))?
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| Error::Other(anyhow::anyhow!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings, api_key })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model(&self) -> &str { &self.settings.model }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Network { message: e.to_string() })?;

        let status = response.status().as_u16();
        let body_text = response
            .text()
            .await
            .map_err(|e| GenerationError::Network { message: e.to_string() })?;
        if status != 200 {
            return Err(parse_http_error(status, &body_text, "openai"));
        }

        let parsed: ChatResponse = serde_json::from_str(&body_text)
            .map_err(|e| GenerationError::Parse { message: format!("Failed to parse response: {e}") })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::Parse { message: "response has no message content".into() })?;
        debug!(model = %self.settings.model, chars = content.len(), "generation complete");
        Ok(content)
    }
}
