//! # LLM Provider Interface
//!
//! A trait-based abstraction for talking to chat backends.
//!
//! ## Design
//! - `LlmProvider` defines the core interface
//! - Implementations for Ollama's native API, OpenAI-compatible servers, and
//!   an offline scripted provider
//! - Streaming is a pull-based `StreamReceiver`: `Text` chunks, a terminal
//!   `Done` marker, and errors on a separate `Result` channel
//! - Usage tracking

pub mod ollama;
pub mod openai;
pub mod scripted;

pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use scripted::ScriptedProvider;

use crate::error::{self, Error, ErrorKind};
use crate::message::Message;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::str::FromStr;

// ============================================================================
// Core Types
// ============================================================================

/// Request parameters for a completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub stream: bool,
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Response from a non-streaming completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub model: String,
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

impl FinishReason {
    pub fn parse(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A streaming chunk from the model
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Text content delta
    Text(String),
    /// Stream finished; nothing follows this chunk
    Done {
        finish_reason: FinishReason,
        usage: Option<Usage>,
    },
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Error type for provider operations
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Network/connection error
    Network(String),
    /// API returned an error
    Api { status: u16, message: String },
    /// Failed to parse response
    Parse(String),
    /// Rate limited
    RateLimited { retry_after: Option<u64> },
    /// Invalid request
    InvalidRequest(String),
    /// Model not found
    ModelNotFound(String),
    /// Authentication failed
    AuthenticationFailed,
    /// The response stream broke off
    Stream(String),
    /// Other error
    Other(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::RateLimited { retry_after } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after {
                    write!(f, " (retry after {}s)", secs)?;
                }
                Ok(())
            }
            Self::InvalidRequest(e) => write!(f, "Invalid request: {}", e),
            Self::ModelNotFound(m) => write!(f, "Model not found: {}", m),
            Self::AuthenticationFailed => write!(f, "Authentication failed"),
            Self::Stream(e) => write!(f, "Stream error: {}", e),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Convert into the unified error, keeping the provider error as source
    pub fn into_error(self) -> Error {
        let kind = match &self {
            Self::Network(_) => ErrorKind::NetworkFailed,
            Self::Api { .. } => ErrorKind::InferenceFailed,
            Self::Parse(_) => ErrorKind::ParseFailed,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::InvalidRequest(_) => ErrorKind::InvalidArgument,
            Self::ModelNotFound(_) => ErrorKind::ProviderUnavailable,
            Self::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            Self::Stream(_) => ErrorKind::StreamFailed,
            Self::Other(_) => ErrorKind::Unexpected,
        };
        Error::new(kind, self.to_string()).set_source(self)
    }

    /// Map a non-success HTTP status to the matching variant
    pub(crate) fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed,
            404 => Self::ModelNotFound(message),
            429 => Self::RateLimited { retry_after: None },
            _ => Self::Api { status, message },
        }
    }
}

/// The main LLM provider trait
#[allow(async_fn_in_trait)]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Get the default model
    fn default_model(&self) -> &str;

    /// Send a completion request and get a full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Send a completion request and stream the response
    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError>;

    /// Chat with message history, without streaming
    async fn chat(&self, model: &str, messages: Vec<Message>) -> Result<String, ProviderError> {
        let request = CompletionRequest::new(messages).with_model(model);
        let response = self.complete(request).await?;
        Ok(response.content)
    }
}

/// Receiver for streaming responses.
///
/// Pull chunks with [`StreamReceiver::next`]. `None` or a `Done` chunk marks
/// exhaustion; an `Err` item is a backend failure after which nothing more
/// should be read.
pub struct StreamReceiver {
    inner: Pin<Box<dyn futures_core::Stream<Item = Result<StreamChunk, ProviderError>> + Send>>,
}

impl StreamReceiver {
    pub fn new<S>(stream: S) -> Self
    where
        S: futures_core::Stream<Item = Result<StreamChunk, ProviderError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Build a receiver from an already-known sequence of items
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Result<StreamChunk, ProviderError>>,
        I::IntoIter: Send + 'static,
    {
        Self::new(futures_util::stream::iter(items))
    }

    /// Pull the next item
    pub async fn next(&mut self) -> Option<Result<StreamChunk, ProviderError>> {
        self.inner.next().await
    }

    /// Collect all text chunks into a single string
    pub async fn collect_text(mut self) -> Result<String, ProviderError> {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            match item? {
                StreamChunk::Text(t) => text.push_str(&t),
                StreamChunk::Done { .. } => break,
            }
        }
        Ok(text)
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3";

/// Configuration for creating providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Ollama,
    OpenAI,
    Scripted,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Ollama => "ollama",
            ProviderType::OpenAI => "openai",
            ProviderType::Scripted => "scripted",
        }
    }
}

impl FromStr for ProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(ProviderType::Ollama),
            "openai" => Ok(ProviderType::OpenAI),
            "scripted" => Ok(ProviderType::Scripted),
            _ => Err(error::unknown_provider(s)),
        }
    }
}

impl ProviderConfig {
    /// Local Ollama server on its default port
    pub fn ollama() -> Self {
        Self::ollama_at(OLLAMA_BASE_URL)
    }

    pub fn ollama_at(base_url: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::Ollama,
            api_key: None,
            base_url: Some(base_url.into()),
            default_model: Some(DEFAULT_MODEL.into()),
            headers: HashMap::new(),
            timeout_secs: Some(300),
        }
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::OpenAI,
            api_key: Some(api_key.into()),
            base_url: Some("https://api.openai.com/v1".into()),
            default_model: Some("gpt-4o".into()),
            headers: HashMap::new(),
            timeout_secs: Some(120),
        }
    }

    /// OpenAI-compatible local server (e.g. Ollama's `/v1` endpoint)
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::OpenAI,
            api_key: None,
            base_url: Some(base_url.into()),
            default_model: Some(model.into()),
            headers: HashMap::new(),
            timeout_secs: Some(300),
        }
    }

    pub fn scripted() -> Self {
        Self {
            provider_type: ProviderType::Scripted,
            api_key: None,
            base_url: None,
            default_model: Some("scripted".into()),
            headers: HashMap::new(),
            timeout_secs: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Build the shared HTTP client for a provider config
pub(crate) fn http_client(config: &ProviderConfig, default_timeout: u64) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(
            config.timeout_secs.unwrap_or(default_timeout),
        ))
        .build()
        .map_err(|e| ProviderError::Other(format!("failed to create HTTP client: {}", e)))
}

// ============================================================================
// Runtime dispatch
// ============================================================================

/// A provider chosen at runtime from configuration
pub enum AnyProvider {
    Ollama(OllamaProvider),
    OpenAI(OpenAIProvider),
    Scripted(ScriptedProvider),
}

impl AnyProvider {
    pub fn from_config(config: ProviderConfig) -> Result<Self, ProviderError> {
        Ok(match config.provider_type {
            ProviderType::Ollama => AnyProvider::Ollama(OllamaProvider::new(config)?),
            ProviderType::OpenAI => AnyProvider::OpenAI(OpenAIProvider::new(config)?),
            ProviderType::Scripted => AnyProvider::Scripted(ScriptedProvider::echo()),
        })
    }
}

impl LlmProvider for AnyProvider {
    fn name(&self) -> &str {
        match self {
            AnyProvider::Ollama(p) => p.name(),
            AnyProvider::OpenAI(p) => p.name(),
            AnyProvider::Scripted(p) => p.name(),
        }
    }

    fn default_model(&self) -> &str {
        match self {
            AnyProvider::Ollama(p) => p.default_model(),
            AnyProvider::OpenAI(p) => p.default_model(),
            AnyProvider::Scripted(p) => p.default_model(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        match self {
            AnyProvider::Ollama(p) => p.complete(request).await,
            AnyProvider::OpenAI(p) => p.complete(request).await,
            AnyProvider::Scripted(p) => p.complete(request).await,
        }
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        match self {
            AnyProvider::Ollama(p) => p.stream(request).await,
            AnyProvider::OpenAI(p) => p.stream(request).await,
            AnyProvider::Scripted(p) => p.stream(request).await,
        }
    }
}

// ============================================================================
// Usage Tracking
// ============================================================================

/// Tracks token usage across multiple calls
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    pub total_calls: usize,
    pub total_prompt_tokens: usize,
    pub total_completion_tokens: usize,
    pub by_model: HashMap<String, Usage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, model: &str, usage: &Usage) {
        self.total_calls += 1;
        self.total_prompt_tokens += usage.prompt_tokens;
        self.total_completion_tokens += usage.completion_tokens;

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.total_tokens += usage.total_tokens;
    }

    pub fn total_tokens(&self) -> usize {
        self.total_prompt_tokens + self.total_completion_tokens
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new(vec![Message::user("Hello")])
            .with_model("llama3")
            .with_temperature(0.7)
            .with_max_tokens(1000)
            .with_streaming(true);

        assert_eq!(request.model, Some("llama3".into()));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(1000));
        assert!(request.stream);
    }

    #[test]
    fn test_provider_config() {
        let config = ProviderConfig::ollama();
        assert_eq!(config.provider_type, ProviderType::Ollama);
        assert_eq!(config.base_url.as_deref(), Some(OLLAMA_BASE_URL));
        assert_eq!(config.default_model.as_deref(), Some(DEFAULT_MODEL));

        let config = ProviderConfig::local("http://localhost:11434/v1", "llama3");
        assert_eq!(config.provider_type, ProviderType::OpenAI);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_provider_type_from_str() {
        assert_eq!("Ollama".parse::<ProviderType>().unwrap(), ProviderType::Ollama);
        assert_eq!("openai".parse::<ProviderType>().unwrap(), ProviderType::OpenAI);
        let err = "bard".parse::<ProviderType>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_provider_error_into_error() {
        let err = ProviderError::Network("refused".into()).into_error();
        assert_eq!(err.kind(), ErrorKind::NetworkFailed);
        assert!(err.message().contains("refused"));

        let err = ProviderError::from_status(429, String::new()).into_error();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn test_collect_text_stops_at_done() {
        let receiver = StreamReceiver::from_items(vec![
            Ok(StreamChunk::Text("Hel".into())),
            Ok(StreamChunk::Text("lo".into())),
            Ok(StreamChunk::Done {
                finish_reason: FinishReason::Stop,
                usage: None,
            }),
            Ok(StreamChunk::Text("ignored".into())),
        ]);
        assert_eq!(receiver.collect_text().await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn test_collect_text_propagates_error() {
        let receiver = StreamReceiver::from_items(vec![
            Ok(StreamChunk::Text("partial".into())),
            Err(ProviderError::Stream("reset".into())),
        ]);
        assert!(receiver.collect_text().await.is_err());
    }

    #[test]
    fn test_usage_tracker() {
        let mut tracker = UsageTracker::new();
        tracker.track("llama3", &Usage::new(100, 50));
        tracker.track("codellama", &Usage::new(200, 100));

        assert_eq!(tracker.total_calls, 2);
        assert_eq!(tracker.total_prompt_tokens, 300);
        assert_eq!(tracker.total_completion_tokens, 150);
        assert_eq!(tracker.total_tokens(), 450);
        assert_eq!(tracker.by_model["llama3"].total_tokens, 150);
    }
}
