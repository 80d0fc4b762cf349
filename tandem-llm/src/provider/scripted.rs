//! Scripted provider - replays canned replies without a backend
//!
//! Every `stream`/`complete` call takes the next reply from the queue and
//! delivers it chunk by chunk. A reply can be told to fail after its chunks,
//! which is how mid-stream backend errors are reproduced offline. In echo
//! mode the provider answers with the last message it was sent.

use super::*;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// One canned reply
#[derive(Debug, Clone, Default)]
pub struct ScriptedReply {
    chunks: Vec<String>,
    failure: Option<String>,
    usage: Option<Usage>,
}

impl ScriptedReply {
    /// Reply delivered exactly as the given chunks
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Reply split into word-sized chunks (whitespace kept with the word)
    pub fn text(text: &str) -> Self {
        Self::chunks(split_words(text))
    }

    /// Raise a stream error once all chunks have been delivered
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    fn full_text(&self) -> String {
        self.chunks.concat()
    }

    fn into_items(self) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut items: Vec<_> = self
            .chunks
            .into_iter()
            .map(|c| Ok(StreamChunk::Text(c)))
            .collect();
        match self.failure {
            Some(message) => items.push(Err(ProviderError::Stream(message))),
            None => items.push(Ok(StreamChunk::Done {
                finish_reason: FinishReason::Stop,
                usage: self.usage,
            })),
        }
        items
    }
}

enum Mode {
    Queue,
    Echo,
}

/// Offline provider for tests and dry runs
pub struct ScriptedProvider {
    mode: Mode,
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    /// Serve the given replies in order, one per call
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            mode: Mode::Queue,
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the content of the last message sent
    pub fn echo() -> Self {
        Self {
            mode: Mode::Echo,
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, in call order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }

    fn next_reply(&self, request: CompletionRequest) -> Result<ScriptedReply, ProviderError> {
        let reply = match self.mode {
            Mode::Echo => Ok(ScriptedReply::text(
                request.messages.last().map(|m| m.content()).unwrap_or_default(),
            )),
            Mode::Queue => lock(&self.replies)
                .pop_front()
                .ok_or_else(|| ProviderError::Other("no scripted reply left".into())),
        };
        lock(&self.requests).push(request);
        reply
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = request.model.clone().unwrap_or_else(|| self.default_model().to_string());
        let reply = self.next_reply(request)?;
        if let Some(message) = &reply.failure {
            return Err(ProviderError::Stream(message.clone()));
        }
        Ok(CompletionResponse {
            model,
            content: reply.full_text(),
            finish_reason: FinishReason::Stop,
            usage: reply.usage.clone().unwrap_or_default(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        let reply = self.next_reply(request)?;
        Ok(StreamReceiver::from_items(reply.into_items()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Split after each run of whitespace so that concatenation is lossless
fn split_words(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_space = false;
    for ch in text.chars() {
        if in_space && !ch.is_whitespace() {
            out.push(std::mem::take(&mut current));
        }
        in_space = ch.is_whitespace();
        current.push(ch);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
