//! # tandem-llm
//!
//! The pieces a multi-agent chat loop is assembled from.
//!
//! ## Core Concepts
//! - **Conversation**: append-only list of role-tagged messages
//! - **Provider**: trait-based LLM communication (Ollama, OpenAI-compatible, scripted)
//! - **StreamAccumulator**: coalesces streamed text fragments into periodic display updates
//! - **DisplaySink**: full-replacement write target for the text of the current turn
//! - **Executor**: persists generated text and runs it, reporting output as data

pub mod accumulator;
pub mod display;
pub mod error;
pub mod exec;
pub mod message;
pub mod provider;

pub use accumulator::{stream_to_sink, Accumulated, FlushPolicy, StreamAccumulator, DEFAULT_BATCH_SIZE};
pub use display::{DisplaySink, MemorySink, NullSink, SinkEvent, TerminalSink};
pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use exec::{extract_code_block, ExecOutput, Executor, ProcessExecutor};
pub use message::{Conversation, Message, Role};
pub use provider::{
    scripted::ScriptedReply, AnyProvider, CompletionRequest, CompletionResponse, FinishReason,
    LlmProvider, OllamaProvider, OpenAIProvider, ProviderConfig, ProviderError, ProviderType,
    ScriptedProvider, StreamChunk, StreamReceiver, Usage, UsageTracker,
};
