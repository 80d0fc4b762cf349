//! Segmented review: one answer and one critique per input segment

use crate::template::render;
use crate::turn::{LoopOutcome, Participant, TerminationReason, TurnRunner};
use tandem_llm::{Conversation, DisplaySink, FlushPolicy, LlmProvider, Message};

/// Feedback template used when none is configured. Placeholders are
/// `{segment}` and `{response}`.
pub const DEFAULT_FEEDBACK_REQUEST: &str =
    "Provide feedback on the following segment: {segment}\n\nResponse:\n{response}";

#[derive(Debug, Clone)]
pub struct SegmentedReview {
    responder: Participant,
    critic: Participant,
    feedback_request: String,
    policy: FlushPolicy,
}

impl SegmentedReview {
    pub fn new(responder: Participant, critic: Participant) -> Self {
        Self {
            responder,
            critic,
            feedback_request: DEFAULT_FEEDBACK_REQUEST.to_string(),
            policy: FlushPolicy::default(),
        }
    }

    pub fn with_feedback_request(mut self, template: impl Into<String>) -> Self {
        self.feedback_request = template.into();
        self
    }

    pub fn with_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// For each segment the responder answers it, then the critic reviews
    /// the answer. Segments are independent: neither side sees earlier ones.
    pub async fn run<P, A, B>(
        &self,
        provider: &P,
        segments: &[String],
        responder_sink: &mut A,
        critic_sink: &mut B,
    ) -> LoopOutcome
    where
        P: LlmProvider,
        A: DisplaySink + ?Sized,
        B: DisplaySink + ?Sized,
    {
        let mut runner = TurnRunner::new(provider, self.policy);
        let mut transcript = Conversation::new();

        for (index, segment) in segments.iter().enumerate() {
            tracing::info!(segment = index + 1, of = segments.len(), "segment");

            let response = runner
                .take_turn(&self.responder, vec![Message::user(segment.as_str())], responder_sink)
                .await;
            transcript.push(Message::assistant(response.as_str()));

            let request = render(
                &self.feedback_request,
                &[("segment", segment), ("response", &response)],
            );
            let feedback = runner
                .take_turn(&self.critic, vec![Message::user(request)], critic_sink)
                .await;
            transcript.push(Message::assistant(feedback));
        }

        runner.finish(transcript, TerminationReason::TurnsExhausted, segments.len())
    }
}
