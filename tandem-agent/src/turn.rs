//! Participants, per-turn records, and the shared turn runner

use tandem_llm::{
    stream_to_sink, CompletionRequest, Conversation, DisplaySink, FlushPolicy, LlmProvider, Message,
    UsageTracker,
};

/// A role in a loop: a display label, a model, and an optional system prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub label: String,
    pub model: String,
    /// Prepended to this participant's requests only; never enters the
    /// shared conversation
    pub system_prompt: Option<String>,
}

impl Participant {
    pub fn new(label: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            model: model.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// The request context for one turn: system prompt first, then `context`
    fn request(&self, context: Vec<Message>) -> CompletionRequest {
        let mut messages = Vec::with_capacity(context.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            messages.push(Message::system(prompt.as_str()));
        }
        messages.extend(context);
        CompletionRequest::new(messages).with_model(self.model.as_str())
    }
}

/// What happened during one participant turn
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub participant: String,
    pub model: String,
    /// Completed reply, or the partial text when the stream failed
    pub text: String,
    pub flushes: usize,
    /// Stream failure description, if any
    pub error: Option<String>,
}

impl TurnRecord {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Why a loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The fixed number of rounds ran out
    TurnsExhausted,
    /// The reviewer's reply contained a termination phrase
    PhraseMatched { phrase: String },
    /// The review loop hit its iteration cap without a matching reply
    IterationLimit { limit: usize },
}

impl TerminationReason {
    /// Every reason except hitting the iteration cap
    pub fn is_success(&self) -> bool {
        !matches!(self, TerminationReason::IterationLimit { .. })
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::TurnsExhausted => write!(f, "all turns taken"),
            TerminationReason::PhraseMatched { phrase } => write!(f, "termination phrase '{}' found", phrase),
            TerminationReason::IterationLimit { limit } => write!(f, "iteration limit of {} reached", limit),
        }
    }
}

/// Everything a finished loop hands back
#[derive(Debug)]
pub struct LoopOutcome {
    pub conversation: Conversation,
    pub reason: TerminationReason,
    pub turns: Vec<TurnRecord>,
    /// Rounds for the bounded loop, author submissions for the review loop,
    /// segments for the segmented review
    pub iterations: usize,
    pub usage: UsageTracker,
}

impl LoopOutcome {
    /// Turns whose stream failed
    pub fn failed_turns(&self) -> impl Iterator<Item = &TurnRecord> {
        self.turns.iter().filter(|t| !t.is_complete())
    }
}

/// Runs single turns against one provider and keeps the bookkeeping
pub(crate) struct TurnRunner<'a, P> {
    provider: &'a P,
    policy: FlushPolicy,
    usage: UsageTracker,
    turns: Vec<TurnRecord>,
}

impl<'a, P: LlmProvider> TurnRunner<'a, P> {
    pub(crate) fn new(provider: &'a P, policy: FlushPolicy) -> Self {
        Self {
            provider,
            policy,
            usage: UsageTracker::new(),
            turns: Vec::new(),
        }
    }

    /// Stream one reply from `participant` into `sink`.
    ///
    /// Returns the text that reached the display. A failed stream yields the
    /// partial text (possibly empty); the failure is recorded, not raised.
    pub(crate) async fn take_turn<S: DisplaySink + ?Sized>(
        &mut self,
        participant: &Participant,
        context: Vec<Message>,
        sink: &mut S,
    ) -> String {
        sink.clear();
        let request = participant.request(context);
        let acc = stream_to_sink(self.provider, request, self.policy, sink).await;

        if let Some(usage) = &acc.usage {
            self.usage.track(&participant.model, usage);
        }
        let error = acc.error.as_ref().map(|e| e.to_string());
        match &error {
            None => tracing::info!(
                participant = %participant.label,
                model = %participant.model,
                chars = acc.text.len(),
                flushes = acc.flushes,
                "turn complete"
            ),
            Some(err) => tracing::warn!(
                participant = %participant.label,
                model = %participant.model,
                error = %err,
                "turn failed, continuing with partial reply"
            ),
        }

        self.turns.push(TurnRecord {
            participant: participant.label.clone(),
            model: participant.model.clone(),
            text: acc.text.clone(),
            flushes: acc.flushes,
            error,
        });
        acc.text
    }

    pub(crate) fn finish(
        self,
        conversation: Conversation,
        reason: TerminationReason,
        iterations: usize,
    ) -> LoopOutcome {
        tracing::info!(%reason, iterations, turns = self.turns.len(), "loop finished");
        LoopOutcome {
            conversation,
            reason,
            turns: self.turns,
            iterations,
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_llm::{MemorySink, Role, ScriptedProvider, ScriptedReply, Usage};

    #[test]
    fn test_system_prompt_only_in_request() {
        let participant = Participant::new("author", "codellama").with_system_prompt("You are a Python developer.");
        let request = participant.request(vec![Message::user("task")]);

        assert_eq!(request.model.as_deref(), Some("codellama"));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role(), Role::System);
        assert_eq!(request.messages[1].content(), "task");
    }

    #[tokio::test]
    async fn test_take_turn_records_usage_and_text() {
        let provider = ScriptedProvider::new(vec![ScriptedReply::text("Hello there").with_usage(Usage::new(3, 2))]);
        let mut runner = TurnRunner::new(&provider, FlushPolicy::default());
        let mut sink = MemorySink::new();

        let text = runner
            .take_turn(&Participant::new("a", "llama3"), vec![Message::user("hi")], &mut sink)
            .await;

        assert_eq!(text, "Hello there");
        assert_eq!(sink.current(), "Hello there");
        let outcome = runner.finish(Conversation::new(), TerminationReason::TurnsExhausted, 1);
        assert_eq!(outcome.usage.total_tokens(), 5);
        assert_eq!(outcome.turns.len(), 1);
        assert!(outcome.turns[0].is_complete());
    }

    #[tokio::test]
    async fn test_take_turn_keeps_partial_text_on_failure() {
        let provider = ScriptedProvider::new(vec![ScriptedReply::chunks(["a", "b"]).failing_with("reset")]);
        let mut runner = TurnRunner::new(&provider, FlushPolicy::every(1).unwrap());
        let mut sink = MemorySink::new();

        let text = runner
            .take_turn(&Participant::new("a", "m"), vec![], &mut sink)
            .await;

        assert_eq!(text, "ab");
        assert_eq!(sink.diagnostics().len(), 1);
        let outcome = runner.finish(Conversation::new(), TerminationReason::TurnsExhausted, 1);
        assert_eq!(outcome.failed_turns().count(), 1);
    }

    #[test]
    fn test_termination_reason_success() {
        assert!(TerminationReason::TurnsExhausted.is_success());
        assert!(TerminationReason::PhraseMatched { phrase: "perfect".into() }.is_success());
        assert!(!TerminationReason::IterationLimit { limit: 3 }.is_success());
    }
}
