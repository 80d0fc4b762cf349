//! Stream accumulation - coalescing streamed fragments into display updates
//!
//! Fragments collect in a pending buffer. When the flush policy triggers, the
//! pending fragments are joined onto the running total and the sink is sent
//! the whole running total. Whatever is still pending when the stream ends is
//! flushed unconditionally.
//!
//! A failing stream stops consumption at once. The sink gets exactly one
//! diagnostic and the caller gets the text flushed so far together with the
//! error. Nothing is retried.

use crate::display::DisplaySink;
use crate::error::{self, Result};
use crate::provider::{
    CompletionRequest, FinishReason, LlmProvider, ProviderError, StreamChunk, StreamReceiver, Usage,
};
use std::fmt;
use std::num::NonZeroUsize;

/// Chunks per flush when nothing else is configured
pub const DEFAULT_BATCH_SIZE: usize = 5;

const ERROR_PREFIX: &str = "An error occurred while fetching the response";

/// When pending chunks are written to the display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Flush whenever this many chunks are pending
    EveryChunks(NonZeroUsize),
    /// Flush whenever a chunk containing a newline arrives
    OnNewline,
}

impl FlushPolicy {
    /// Batch policy; a zero batch size is a configuration error
    pub fn every(batch_size: usize) -> Result<Self> {
        NonZeroUsize::new(batch_size)
            .map(FlushPolicy::EveryChunks)
            .ok_or_else(error::zero_batch_size)
    }

    fn triggers(&self, pending: usize, chunk: &str) -> bool {
        match self {
            FlushPolicy::EveryChunks(n) => pending >= n.get(),
            FlushPolicy::OnNewline => chunk.contains('\n'),
        }
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy::EveryChunks(NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN))
    }
}

/// Result of consuming one stream
#[derive(Debug, Clone)]
pub struct Accumulated {
    /// Concatenation of every flushed chunk
    pub text: String,
    /// Number of display updates issued (diagnostics excluded)
    pub flushes: usize,
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
    /// Set when the stream failed; `text` is then partial
    pub error: Option<ProviderError>,
}

impl Accumulated {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// The completed text, or the stream failure as an error
    pub fn into_result(self) -> Result<String> {
        match self.error {
            None => Ok(self.text),
            Some(err) => Err(err
                .into_error()
                .with_operation("accumulator::consume")
                .with_context("partial_len", self.text.len().to_string())
                .with_context("flushes", self.flushes.to_string())),
        }
    }
}

/// Running state for one streamed turn
#[derive(Debug)]
pub struct StreamAccumulator {
    policy: FlushPolicy,
    pending: Vec<String>,
    total: String,
    flushes: usize,
}

impl StreamAccumulator {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            pending: Vec::new(),
            total: String::new(),
            flushes: 0,
        }
    }

    /// Text flushed so far
    pub fn text(&self) -> &str {
        &self.total
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Add one fragment, flushing if the policy says so. Returns whether a
    /// flush happened.
    pub fn push<S: DisplaySink + ?Sized>(&mut self, chunk: String, sink: &mut S) -> bool {
        let triggers = {
            self.pending.push(chunk);
            let last = self.pending.last().map(String::as_str).unwrap_or_default();
            self.policy.triggers(self.pending.len(), last)
        };
        if triggers {
            self.flush(sink)
        } else {
            false
        }
    }

    /// Join pending fragments onto the total and show the total.
    /// Does nothing when nothing is pending.
    pub fn flush<S: DisplaySink + ?Sized>(&mut self, sink: &mut S) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        for chunk in self.pending.drain(..) {
            self.total.push_str(&chunk);
        }
        self.flushes += 1;
        tracing::debug!(flush = self.flushes, len = self.total.len(), "flush");
        sink.replace(&self.total);
        true
    }

    /// Stream exhausted: flush the remainder and hand back the text
    pub fn finish<S: DisplaySink + ?Sized>(mut self, sink: &mut S) -> Accumulated {
        self.flush(sink);
        self.into_accumulated(None, None, None)
    }

    /// Stream failed: drop what is pending, show one diagnostic, keep the
    /// flushed text
    pub fn fail<S: DisplaySink + ?Sized>(self, error: ProviderError, sink: &mut S) -> Accumulated {
        tracing::warn!(error = %error, partial_len = self.total.len(), "stream failed");
        sink.diagnostic(&diagnostic_text(&error));
        self.into_accumulated(Some(error), None, None)
    }

    fn into_accumulated(
        self,
        error: Option<ProviderError>,
        usage: Option<Usage>,
        finish_reason: Option<FinishReason>,
    ) -> Accumulated {
        Accumulated {
            text: self.total,
            flushes: self.flushes,
            usage,
            finish_reason,
            error,
        }
    }

    /// Consume a provider stream to its end
    pub async fn consume<S: DisplaySink + ?Sized>(
        policy: FlushPolicy,
        mut receiver: StreamReceiver,
        sink: &mut S,
    ) -> Accumulated {
        let mut acc = Self::new(policy);
        let mut done = None;

        while let Some(item) = receiver.next().await {
            match item {
                Ok(StreamChunk::Text(text)) => {
                    acc.push(text, sink);
                }
                Ok(StreamChunk::Done {
                    finish_reason,
                    usage,
                }) => {
                    done = Some((finish_reason, usage));
                    break;
                }
                Err(err) => return acc.fail(err, sink),
            }
        }

        acc.flush(sink);
        let (finish_reason, usage) = match done {
            Some((reason, usage)) => (Some(reason), usage),
            None => (None, None),
        };
        acc.into_accumulated(None, usage, finish_reason)
    }

    /// Consume a plain iterator of fragments.
    ///
    /// The first `Err` stops consumption; its description becomes the
    /// diagnostic.
    pub fn consume_iter<I, E, S>(policy: FlushPolicy, chunks: I, sink: &mut S) -> Accumulated
    where
        I: IntoIterator<Item = std::result::Result<String, E>>,
        E: fmt::Display,
        S: DisplaySink + ?Sized,
    {
        let mut acc = Self::new(policy);
        for item in chunks {
            match item {
                Ok(text) => {
                    acc.push(text, sink);
                }
                Err(err) => return acc.fail(ProviderError::Stream(err.to_string()), sink),
            }
        }
        acc.finish(sink)
    }
}

/// Open a stream for `request` and consume it into `sink`.
///
/// A stream that cannot even be opened is treated like one that failed
/// before its first chunk.
pub async fn stream_to_sink<P, S>(
    provider: &P,
    request: CompletionRequest,
    policy: FlushPolicy,
    sink: &mut S,
) -> Accumulated
where
    P: LlmProvider,
    S: DisplaySink + ?Sized,
{
    match provider.stream(request.with_streaming(true)).await {
        Ok(receiver) => StreamAccumulator::consume(policy, receiver, sink).await,
        Err(err) => StreamAccumulator::new(policy).fail(err, sink),
    }
}

fn diagnostic_text(error: &ProviderError) -> String {
    format!("{}: {}", ERROR_PREFIX, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::MemorySink;
    use crate::message::Message;
    use crate::provider::scripted::{ScriptedProvider, ScriptedReply};

    fn ok_chunks(chunks: &[&str]) -> Vec<std::result::Result<String, String>> {
        chunks.iter().map(|c| Ok(c.to_string())).collect()
    }

    fn every(n: usize) -> FlushPolicy {
        FlushPolicy::every(n).unwrap()
    }

    #[test]
    fn test_hello_world_batch_of_two() {
        let mut sink = MemorySink::new();
        let acc = StreamAccumulator::consume_iter(every(2), ok_chunks(&["Hel", "lo, ", "World!"]), &mut sink);

        assert_eq!(sink.updates(), vec!["Hello, ", "Hello, World!"]);
        assert_eq!(acc.text, "Hello, World!");
        assert_eq!(acc.flushes, 2);
        assert!(acc.is_complete());
    }

    #[test]
    fn test_flush_count_is_ceiling() {
        let chunks: Vec<String> = (0..23).map(|i| format!("c{} ", i)).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();

        for n in 1..=25 {
            let mut sink = MemorySink::new();
            let acc = StreamAccumulator::consume_iter(every(n), ok_chunks(&refs), &mut sink);
            assert_eq!(acc.flushes, (23 + n - 1) / n, "batch size {}", n);
            assert_eq!(sink.updates().last().copied(), Some(chunks.concat().as_str()));
        }
    }

    #[test]
    fn test_updates_grow_by_prefix() {
        let mut sink = MemorySink::new();
        StreamAccumulator::consume_iter(every(3), ok_chunks(&["a", "b", "c", "d", "e", "f", "g"]), &mut sink);

        let updates = sink.updates();
        for pair in updates.windows(2) {
            assert!(pair[1].starts_with(pair[0]), "{:?} does not extend {:?}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_same_input_same_output() {
        let input = ["x", "y", "z", "w"];
        let a = StreamAccumulator::consume_iter(every(3), ok_chunks(&input), &mut MemorySink::new());
        let b = StreamAccumulator::consume_iter(every(3), ok_chunks(&input), &mut MemorySink::new());
        assert_eq!(a.text, b.text);
        assert_eq!(a.flushes, b.flushes);
    }

    #[test]
    fn test_empty_stream_issues_no_update() {
        let mut sink = MemorySink::new();
        let acc = StreamAccumulator::consume_iter(every(2), ok_chunks(&[]), &mut sink);
        assert_eq!(acc.text, "");
        assert_eq!(acc.flushes, 0);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_newline_policy() {
        let mut sink = MemorySink::new();
        let acc = StreamAccumulator::consume_iter(
            FlushPolicy::OnNewline,
            ok_chunks(&["# Title", "\n", "Body ", "text\nmore", " tail"]),
            &mut sink,
        );

        assert_eq!(
            sink.updates(),
            vec!["# Title\n", "# Title\nBody text\nmore", "# Title\nBody text\nmore tail"]
        );
        assert_eq!(acc.flushes, 3);
    }

    #[test]
    fn test_failure_keeps_flushed_text_and_reports_once() {
        let mut sink = MemorySink::new();
        let chunks: Vec<std::result::Result<String, String>> = vec![
            Ok("Hel".into()),
            Ok("lo".into()),
            Ok(" pending".into()),
            Err("connection reset".into()),
            Ok("never read".into()),
        ];
        let acc = StreamAccumulator::consume_iter(every(2), chunks, &mut sink);

        assert_eq!(acc.text, "Hello");
        assert_eq!(sink.updates(), vec!["Hello"]);
        assert_eq!(sink.diagnostics().len(), 1);
        assert!(sink.diagnostics()[0].starts_with("An error occurred while fetching the response"));
        assert!(sink.diagnostics()[0].contains("connection reset"));

        let err = acc.into_result().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::StreamFailed);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = FlushPolicy::every(0).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ConfigInvalid);
    }

    #[tokio::test]
    async fn test_consume_receiver_records_usage() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::chunks(["Hel", "lo, ", "World!"]).with_usage(Usage::new(4, 3))
        ]);
        let mut sink = MemorySink::new();
        let acc = stream_to_sink(
            &provider,
            CompletionRequest::new(vec![Message::user("hi")]),
            every(2),
            &mut sink,
        )
        .await;

        assert_eq!(acc.text, "Hello, World!");
        assert_eq!(acc.usage, Some(Usage::new(4, 3)));
        assert_eq!(acc.finish_reason, Some(FinishReason::Stop));
        assert!(provider.requests()[0].stream);
    }

    #[tokio::test]
    async fn test_open_failure_becomes_diagnostic() {
        let provider = ScriptedProvider::new(vec![]);
        let mut sink = MemorySink::new();
        let acc = stream_to_sink(&provider, CompletionRequest::new(vec![]), every(2), &mut sink).await;

        assert_eq!(acc.text, "");
        assert!(acc.error.is_some());
        assert_eq!(sink.diagnostics().len(), 1);
    }
}
