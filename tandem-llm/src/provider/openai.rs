//! OpenAI-compatible provider implementation
//!
//! Works with OpenAI, vLLM, Ollama's `/v1` endpoint, and other
//! OpenAI-compatible APIs.

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = http_client(&config, 120)?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> OpenAIRequest {
        let model = request.model.as_deref().unwrap_or(self.default_model());
        OpenAIRequest {
            model: model.to_string(),
            messages: request.messages.iter().map(OpenAIMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: Some(stream),
            stop: request.stop.clone(),
        }
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let body = self.build_request(request, stream);
        tracing::debug!(model = %body.model, messages = body.messages.len(), stream, "openai chat request");

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url()))
            .json(&body);

        if let Some(api_key) = &self.config.api_key {
            if !api_key.is_empty() {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
        }

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req
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
}

impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("gpt-4o")
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let response = self.send(&request, false).await?;

        let api_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let choice = api_response
            .choices
            .first()
            .ok_or_else(|| ProviderError::Other("No choices in response".into()))?;

        let usage = api_response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            model: api_response.model,
            content: choice.message.content.clone().unwrap_or_default(),
            finish_reason: FinishReason::parse(choice.finish_reason.as_deref()),
            usage,
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        let response = self.send(&request, true).await?;

        // Create async stream from SSE response
        let stream = async_stream::stream! {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

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

            if !decoder.is_done() {
                yield Ok(StreamChunk::Done {
                    finish_reason: FinishReason::Unknown,
                    usage: None,
                });
            }
        };

        Ok(StreamReceiver::new(stream))
    }
}

// ============================================================================
// SSE decoding
// ============================================================================

/// Turns `data: ...` server-sent events into stream chunks
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: String,
    done: bool,
}

impl SseDecoder {
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        // Process complete SSE events
        while let Some(pos) = self.buffer.find("\n\n") {
            let event = self.buffer[..pos].to_string();
            self.buffer = self.buffer[pos + 2..].to_string();

            for line in event.lines() {
                let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                    continue;
                };

                if data == "[DONE]" {
                    out.push(Ok(StreamChunk::Done {
                        finish_reason: FinishReason::Stop,
                        usage: None,
                    }));
                    self.done = true;
                    return out;
                }

                match serde_json::from_str::<OpenAIStreamChunk>(data) {
                    Ok(chunk) => {
                        let Some(choice) = chunk.choices.first() else {
                            continue;
                        };
                        if let Some(content) = &choice.delta.content {
                            if !content.is_empty() {
                                out.push(Ok(StreamChunk::Text(content.clone())));
                            }
                        }
                        if let Some(reason) = &choice.finish_reason {
                            out.push(Ok(StreamChunk::Done {
                                finish_reason: FinishReason::parse(Some(reason)),
                                usage: chunk.usage.as_ref().map(|u| Usage {
                                    prompt_tokens: u.prompt_tokens,
                                    completion_tokens: u.completion_tokens,
                                    total_tokens: u.total_tokens,
                                }),
                            }));
                            self.done = true;
                            return out;
                        }
                    }
                    Err(e) => {
                        out.push(Err(ProviderError::Parse(e.to_string())));
                        self.done = true;
                        return out;
                    }
                }
            }
        }
        out
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

impl From<&Message> for OpenAIMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role().as_str().to_string(),
            content: Some(msg.content().to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    choices: Vec<OpenAIStreamChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_sse_decoder_text_and_finish() {
        let mut decoder = SseDecoder::default();
        let items = decoder.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n\
              data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        );
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Ok(StreamChunk::Text(t)) if t == "Hi"));
        assert!(matches!(
            &items[1],
            Ok(StreamChunk::Done { finish_reason: FinishReason::Stop, .. })
        ));
        assert!(decoder.is_done());
    }

    #[test]
    fn test_sse_decoder_waits_for_complete_event() {
        let mut decoder = SseDecoder::default();
        assert!(decoder
            .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}")
            .is_empty());
        let items = decoder.push(b",\"finish_reason\":null}]}\n\n");
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_sse_decoder_done_marker() {
        let mut decoder = SseDecoder::default();
        let items = decoder.push(b"data: [DONE]\n\n");
        assert!(matches!(&items[0], Ok(StreamChunk::Done { .. })));
    }

    #[tokio::test]
    async fn test_stream_against_server() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello, \"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"World!\"},\"finish_reason\":null}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let mut config = ProviderConfig::local(format!("{}/v1", server.uri()), "llama3");
        config.api_key = Some("sk-test".into());
        let provider = OpenAIProvider::new(config).unwrap();

        let receiver = provider
            .stream(CompletionRequest::new(vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(receiver.collect_text().await.unwrap(), "Hello, World!");
    }
}
