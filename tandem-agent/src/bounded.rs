//! Bounded round-robin loop over a shared conversation

use crate::turn::{LoopOutcome, Participant, TerminationReason, TurnRunner};
use tandem_llm::{Conversation, DisplaySink, Error, FlushPolicy, LlmProvider, Message, Result};

/// Runs `turns` rounds; in each round every participant replies once, in
/// order, to the whole conversation so far. Each reply is appended as an
/// assistant message before the next participant speaks.
#[derive(Debug, Clone)]
pub struct BoundedLoop {
    participants: Vec<Participant>,
    turns: usize,
    policy: FlushPolicy,
}

impl BoundedLoop {
    pub fn new(participants: Vec<Participant>, turns: usize) -> Result<Self> {
        if participants.is_empty() {
            return Err(Error::invalid_argument("a bounded loop needs at least one participant")
                .with_operation("bounded_loop::new"));
        }
        Ok(Self {
            participants,
            turns,
            policy: FlushPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn turns(&self) -> usize {
        self.turns
    }

    /// Run every round. `sinks[i]` displays participant `i`.
    pub async fn run<P: LlmProvider>(
        &self,
        provider: &P,
        mut conversation: Conversation,
        sinks: &mut [&mut dyn DisplaySink],
    ) -> Result<LoopOutcome> {
        if sinks.len() != self.participants.len() {
            return Err(Error::invalid_argument(format!(
                "expected {} display sinks, got {}",
                self.participants.len(),
                sinks.len()
            ))
            .with_operation("bounded_loop::run"));
        }

        let mut runner = TurnRunner::new(provider, self.policy);
        for round in 0..self.turns {
            tracing::debug!(round = round + 1, of = self.turns, "round");
            for (participant, sink) in self.participants.iter().zip(sinks.iter_mut()) {
                let context = conversation.messages().to_vec();
                let reply = runner.take_turn(participant, context, &mut **sink).await;
                conversation.push(Message::assistant(reply));
            }
        }

        Ok(runner.finish(conversation, TerminationReason::TurnsExhausted, self.turns))
    }
}
