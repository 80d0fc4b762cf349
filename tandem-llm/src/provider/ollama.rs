//! Ollama native chat provider
//!
//! Talks to `/api/chat`. Streaming responses are newline-delimited JSON: one
//! object per delta, the last one carrying `"done": true` plus token counts.

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Provider for a local (or remote) Ollama server
pub struct OllamaProvider {
    client: Client,
    config: ProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = http_client(&config, 300)?;
        Ok(Self { client, config })
    }

    /// Create with default local settings
    pub fn local() -> Result<Self, ProviderError> {
        Self::new(ProviderConfig::ollama())
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(OLLAMA_BASE_URL)
            .trim_end_matches('/')
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> OllamaChatRequest {
        let model = request.model.as_deref().unwrap_or(self.default_model());
        let options = if request.temperature.is_some()
            || request.max_tokens.is_some()
            || request.stop.is_some()
        {
            Some(OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
                stop: request.stop.clone(),
            })
        } else {
            None
        };

        OllamaChatRequest {
            model: model.to_string(),
            messages: request.messages.iter().map(OllamaMessage::from).collect(),
            stream,
            options,
        }
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let body = self.build_request(request, stream);
        tracing::debug!(model = %body.model, messages = body.messages.len(), stream, "ollama chat request");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url()))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, text));
        }
        Ok(response)
    }

    /// List the models installed on the server
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url()))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let tags: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let response = self.send(&request, false).await?;
        let line: OllamaChatLine = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if let Some(message) = line.error {
            return Err(ProviderError::Other(message));
        }

        Ok(CompletionResponse {
            model: line.model.clone().unwrap_or_default(),
            content: line.message.as_ref().map(|m| m.content.clone()).unwrap_or_default(),
            finish_reason: FinishReason::parse(line.done_reason.as_deref()),
            usage: line.usage().unwrap_or_default(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        let response = self.send(&request, true).await?;

        let stream = async_stream::stream! {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = NdjsonDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        for item in decoder.push(&bytes) {
                            let stop = !matches!(item, Ok(StreamChunk::Text(_)));
                            yield item;
                            if stop {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(ProviderError::Stream(e.to_string()));
                        return;
                    }
                }
            }

            for item in decoder.finish() {
                yield item;
            }
        };

        Ok(StreamReceiver::new(stream))
    }
}

// ============================================================================
// NDJSON decoding
// ============================================================================

/// Splits a byte stream into lines and decodes each as a chat delta.
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// network reads decode correctly.
#[derive(Debug, Default)]
pub(crate) struct NdjsonDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl NdjsonDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line[..line.len() - 1], &mut out);
            if self.done {
                self.buffer.clear();
                break;
            }
        }
        out
    }

    /// Flush a trailing line without newline, and report truncation
    pub(crate) fn finish(&mut self) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut out = Vec::new();
        if !self.done {
            let rest = std::mem::take(&mut self.buffer);
            self.decode_line(&rest, &mut out);
        }
        if !self.done && !out.iter().any(|item| item.is_err()) {
            out.push(Err(ProviderError::Stream(
                "stream ended without completion signal".into(),
            )));
            self.done = true;
        }
        out
    }

    fn decode_line(&mut self, raw: &[u8], out: &mut Vec<Result<StreamChunk, ProviderError>>) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                out.push(Err(ProviderError::Parse(e.to_string())));
                self.done = true;
                return;
            }
        };
        if line.is_empty() {
            return;
        }

        let parsed: OllamaChatLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                out.push(Err(ProviderError::Parse(format!("{}: {}", e, line))));
                self.done = true;
                return;
            }
        };

        if let Some(message) = parsed.error {
            out.push(Err(ProviderError::Stream(message)));
            self.done = true;
            return;
        }

        // Empty fragments are forwarded; they count toward a flush batch
        if let Some(message) = &parsed.message {
            out.push(Ok(StreamChunk::Text(message.content.clone())));
        }

        if parsed.done {
            out.push(Ok(StreamChunk::Done {
                finish_reason: FinishReason::parse(parsed.done_reason.as_deref()),
                usage: parsed.usage(),
            }));
            self.done = true;
        }
    }
}

// ============================================================================
// Ollama API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role().as_str().to_string(),
            content: msg.content().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatLine {
    model: Option<String>,
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    prompt_eval_count: Option<usize>,
    eval_count: Option<usize>,
    error: Option<String>,
}

impl OllamaChatLine {
    fn usage(&self) -> Option<Usage> {
        match (self.prompt_eval_count, self.eval_count) {
            (None, None) => None,
            (prompt, completion) => Some(Usage::new(prompt.unwrap_or(0), completion.unwrap_or(0))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}
