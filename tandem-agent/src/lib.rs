//! # tandem-agent
//!
//! Loops that pass a conversation between participants:
//! 1. Each participant turn streams one reply into that participant's display
//! 2. The completed reply is appended to the transcript
//! 3. The bounded loop stops after a fixed number of rounds
//! 4. The review loop alternates author and reviewer until the reviewer's
//!    reply contains a termination phrase, optionally running the author's
//!    code in between
//! 5. The segmented review pairs one answer and one critique per segment
//!
//! Turns are strictly sequential; a loop owns its conversation and hands it
//! back in the [`LoopOutcome`].

mod bounded;
mod config;
mod phrases;
mod review;
mod segments;
mod template;
mod turn;

pub use bounded::BoundedLoop;
pub use config::{ChatConfig, FlushConfig, ProviderSettings, ReviewConfig, SegmentsConfig, TandemConfig};
pub use phrases::{TerminationPhrases, DEFAULT_TERMINATION_PHRASES};
pub use review::{ExecHook, NoHook, ReviewLoop, ReviewPrompts, ReviewState, TurnHook, DEFAULT_MAX_ITERATIONS};
pub use segments::{SegmentedReview, DEFAULT_FEEDBACK_REQUEST};
pub use turn::{LoopOutcome, Participant, TerminationReason, TurnRecord};
