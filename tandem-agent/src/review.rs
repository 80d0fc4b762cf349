//! Conditional review loop
//!
//! An author answers a task, a hook may persist and run the answer, and a
//! reviewer critiques it. The loop alternates until the reviewer's reply
//! contains a termination phrase or the iteration cap is reached.
//!
//! Each turn gets a freshly built context (system prompt plus one user
//! message). The returned conversation holds only the replies, in order.

use crate::phrases::TerminationPhrases;
use crate::template::render;
use crate::turn::{LoopOutcome, Participant, TerminationReason, TurnRunner};
use tandem_llm::{
    extract_code_block, Conversation, DisplaySink, Error, ExecOutput, Executor, FlushPolicy,
    LlmProvider, Message, Result,
};

/// Cap on author submissions when nothing else is configured
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Prompt templates. Placeholders are `{task}`, `{submission}`,
/// `{feedback}`, `{stdout}` and `{stderr}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewPrompts {
    /// First message to the author
    pub task: String,
    /// Message to the reviewer
    pub review_request: String,
    /// Message to the author after a review without a termination phrase
    pub revision_request: String,
}

impl Default for ReviewPrompts {
    fn default() -> Self {
        Self {
            task: "Write a Python script that prints 'Hello, World!'".to_string(),
            review_request: "Please review the following Python script and provide feedback. \
                The script should print 'Hello, World!' as its output: {submission}"
                .to_string(),
            revision_request: "Adjust the following Python script based on the feedback: {feedback}. \
                Ensure it prints 'Hello, World!'.\n\nScript:\n{submission}"
                .to_string(),
        }
    }
}

/// Where the loop is between turns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    /// The author speaks next
    AwaitingFirst,
    /// The reviewer speaks next
    AwaitingSecond,
    Done,
}

impl ReviewState {
    /// Transition after a turn; `phrase_found` only matters for reviewer turns
    pub fn next(self, phrase_found: bool) -> Self {
        match self {
            ReviewState::AwaitingFirst => ReviewState::AwaitingSecond,
            ReviewState::AwaitingSecond if phrase_found => ReviewState::Done,
            ReviewState::AwaitingSecond => ReviewState::AwaitingFirst,
            ReviewState::Done => ReviewState::Done,
        }
    }
}

/// Runs after each author submission; what it returns is shown to the
/// reviewer alongside the submission
#[allow(async_fn_in_trait)]
pub trait TurnHook {
    async fn after_submission(&self, iteration: usize, submission: &str) -> Option<ExecOutput>;
}

/// Does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHook;

impl TurnHook for NoHook {
    async fn after_submission(&self, _iteration: usize, _submission: &str) -> Option<ExecOutput> {
        None
    }
}

/// Writes each submission to a named resource and executes it.
///
/// A persist failure does not stop the loop; it comes back as an
/// [`ExecOutput`] whose stderr describes the failure.
#[derive(Debug, Clone)]
pub struct ExecHook<E> {
    executor: E,
    resource: String,
    extract_code: bool,
}

impl<E: Executor> ExecHook<E> {
    pub fn new(executor: E, resource: impl Into<String>) -> Self {
        Self {
            executor,
            resource: resource.into(),
            extract_code: true,
        }
    }

    /// Persist the raw reply instead of its first fenced code block
    pub fn raw(mut self) -> Self {
        self.extract_code = false;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }
}

impl<E: Executor> TurnHook for ExecHook<E> {
    async fn after_submission(&self, iteration: usize, submission: &str) -> Option<ExecOutput> {
        let content = if self.extract_code {
            extract_code_block(submission)
        } else {
            submission.to_string()
        };

        if let Err(e) = self.executor.persist(&self.resource, &content).await {
            tracing::warn!(iteration, resource = %self.resource, error = %e, "persist failed");
            return Some(ExecOutput::failed(e.to_string()));
        }
        let output = self.executor.execute(&self.resource).await;
        tracing::debug!(iteration, exit_code = ?output.exit_code, "submission executed");
        Some(output)
    }
}

/// Author/reviewer loop that stops on a termination phrase
#[derive(Debug, Clone)]
pub struct ReviewLoop {
    author: Participant,
    reviewer: Participant,
    prompts: ReviewPrompts,
    phrases: TerminationPhrases,
    max_iterations: Option<usize>,
    policy: FlushPolicy,
}

impl ReviewLoop {
    pub fn new(author: Participant, reviewer: Participant) -> Self {
        Self {
            author,
            reviewer,
            prompts: ReviewPrompts::default(),
            phrases: TerminationPhrases::default(),
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
            policy: FlushPolicy::default(),
        }
    }

    pub fn with_prompts(mut self, prompts: ReviewPrompts) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_phrases(mut self, phrases: TerminationPhrases) -> Self {
        self.phrases = phrases;
        self
    }

    /// Cap on author submissions; `None` runs until a phrase matches.
    /// A cap of zero is rejected.
    pub fn with_max_iterations(mut self, max_iterations: Option<usize>) -> Result<Self> {
        if max_iterations == Some(0) {
            return Err(Error::config_invalid(
                "loop.max_iterations",
                "iteration limit must be at least 1",
            ));
        }
        self.max_iterations = max_iterations;
        Ok(self)
    }

    pub fn with_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_iterations(&self) -> Option<usize> {
        self.max_iterations
    }

    fn review_message(&self, submission: &str, report: Option<&ExecOutput>) -> String {
        let template = &self.prompts.review_request;
        let (stdout, stderr) = report
            .map(|r| (r.stdout.as_str(), r.stderr.as_str()))
            .unwrap_or_default();
        let mut message = render(
            template,
            &[
                ("task", &self.prompts.task),
                ("submission", submission),
                ("stdout", stdout),
                ("stderr", stderr),
            ],
        );

        // Templates without output placeholders still get the report
        if let Some(report) = report {
            if !template.contains("{stdout}") {
                message.push_str(&format!("\n\nOutput of the script:\n{}", report.stdout));
            }
            if !template.contains("{stderr}") && !report.stderr.is_empty() {
                message.push_str(&format!("\n\nErrors:\n{}", report.stderr));
            }
        }
        message
    }

    fn revision_message(&self, submission: &str, feedback: &str) -> String {
        render(
            &self.prompts.revision_request,
            &[
                ("task", &self.prompts.task),
                ("submission", submission),
                ("feedback", feedback),
            ],
        )
    }

    /// Run until a reviewer reply matches a termination phrase or the cap
    /// is reached.
    pub async fn run<P, H, A, R>(
        &self,
        provider: &P,
        hook: &H,
        author_sink: &mut A,
        reviewer_sink: &mut R,
    ) -> LoopOutcome
    where
        P: LlmProvider,
        H: TurnHook + ?Sized,
        A: DisplaySink + ?Sized,
        R: DisplaySink + ?Sized,
    {
        let mut runner = TurnRunner::new(provider, self.policy);
        let mut transcript = Conversation::new();
        let mut state = ReviewState::AwaitingFirst;
        let mut author_input = self.prompts.task.clone();
        let mut submission = String::new();
        let mut report: Option<ExecOutput> = None;
        let mut matched: Option<String> = None;
        let mut iterations = 0;

        let reason = loop {
            match state {
                ReviewState::AwaitingFirst => {
                    if let Some(limit) = self.max_iterations {
                        if iterations >= limit {
                            tracing::warn!(limit, "review loop hit its iteration limit");
                            break TerminationReason::IterationLimit { limit };
                        }
                    }
                    iterations += 1;
                    tracing::info!(iteration = iterations, "author turn");

                    submission = runner
                        .take_turn(&self.author, vec![Message::user(author_input.as_str())], author_sink)
                        .await;
                    transcript.push(Message::assistant(submission.as_str()));
                    report = hook.after_submission(iterations, &submission).await;
                    state = state.next(false);
                }
                ReviewState::AwaitingSecond => {
                    let request = self.review_message(&submission, report.as_ref());
                    let feedback = runner
                        .take_turn(&self.reviewer, vec![Message::user(request)], reviewer_sink)
                        .await;
                    transcript.push(Message::assistant(feedback.as_str()));

                    matched = self.phrases.find(&feedback).map(str::to_string);
                    state = state.next(matched.is_some());
                    if matched.is_none() {
                        author_input = self.revision_message(&submission, &feedback);
                    }
                }
                ReviewState::Done => {
                    break TerminationReason::PhraseMatched {
                        phrase: matched.take().unwrap_or_default(),
                    };
                }
            }
        };

        runner.finish(transcript, reason, iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tandem_llm::{MemorySink, NullSink, ScriptedProvider, ScriptedReply};

    fn review_loop() -> ReviewLoop {
        ReviewLoop::new(
            Participant::new("author", "codellama").with_system_prompt("You are a Python developer."),
            Participant::new("reviewer", "llama3").with_system_prompt("You are a code reviewer."),
        )
    }

    /// Records submissions and answers with a fixed report
    #[derive(Default)]
    struct RecordingHook {
        seen: Mutex<Vec<(usize, String)>>,
    }

    impl TurnHook for RecordingHook {
        async fn after_submission(&self, iteration: usize, submission: &str) -> Option<ExecOutput> {
            self.seen.lock().unwrap().push((iteration, submission.to_string()));
            Some(ExecOutput {
                stdout: "Hello, World!".into(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    /// Always reports the same execution output
    struct FixedReport(ExecOutput);

    impl TurnHook for FixedReport {
        async fn after_submission(&self, _iteration: usize, _submission: &str) -> Option<ExecOutput> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(ReviewState::AwaitingFirst.next(true), ReviewState::AwaitingSecond);
        assert_eq!(ReviewState::AwaitingSecond.next(false), ReviewState::AwaitingFirst);
        assert_eq!(ReviewState::AwaitingSecond.next(true), ReviewState::Done);
        assert_eq!(ReviewState::Done.next(false), ReviewState::Done);
    }

    #[tokio::test]
    async fn test_first_review_terminates() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::text("print('Hello, World!')"),
            ScriptedReply::text("No issues found."),
        ]);
        let outcome = review_loop()
            .run(&provider, &NoHook, &mut NullSink, &mut NullSink)
            .await;

        assert_eq!(outcome.conversation.len(), 2);
        assert_eq!(
            outcome.reason,
            TerminationReason::PhraseMatched { phrase: "no issues found".into() }
        );
        assert_eq!(outcome.iterations, 1);
    }

    #[tokio::test]
    async fn test_revision_carries_feedback() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::text("print('Hello World')"),
            ScriptedReply::text("Missing the comma."),
            ScriptedReply::text("print('Hello, World!')"),
            ScriptedReply::text("The Assignment Is Completed."),
        ]);
        let mut author = MemorySink::new();
        let mut reviewer = MemorySink::new();

        let outcome = review_loop()
            .run(&provider, &NoHook, &mut author, &mut reviewer)
            .await;

        assert_eq!(outcome.conversation.len(), 4);
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.reason.is_success());

        let requests = provider.requests();
        assert_eq!(requests[0].model.as_deref(), Some("codellama"));
        assert_eq!(requests[1].model.as_deref(), Some("llama3"));
        assert_eq!(requests[1].messages[0].content(), "You are a code reviewer.");
        assert!(requests[1].messages[1].content().ends_with("print('Hello World')"));
        let revision = requests[2].messages[1].content();
        assert!(revision.contains("Missing the comma."));
        assert!(revision.contains("print('Hello World')"));
        assert_eq!(author.current(), "print('Hello, World!')");
        assert_eq!(reviewer.current(), "The Assignment Is Completed.");
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let provider = ScriptedProvider::new(["v1", "fix it", "v2", "still wrong"].map(ScriptedReply::text));
        let outcome = review_loop()
            .with_max_iterations(Some(2))
            .unwrap()
            .run(&provider, &NoHook, &mut NullSink, &mut NullSink)
            .await;

        assert_eq!(outcome.reason, TerminationReason::IterationLimit { limit: 2 });
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.conversation.len(), 4);
        assert_eq!(provider.remaining(), 0);
    }

    #[test]
    fn test_zero_iteration_limit_rejected() {
        let err = review_loop().with_max_iterations(Some(0)).unwrap_err();
        assert_eq!(err.kind(), tandem_llm::ErrorKind::ConfigInvalid);
        assert!(review_loop().with_max_iterations(None).is_ok());
    }

    #[tokio::test]
    async fn test_hook_report_reaches_reviewer() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::text("```python\nprint('Hello, World!')\n```"),
            ScriptedReply::text("Perfect."),
        ]);
        let hook = RecordingHook::default();

        let outcome = review_loop()
            .run(&provider, &hook, &mut NullSink, &mut NullSink)
            .await;

        assert_eq!(hook.seen.lock().unwrap()[0].0, 1);
        let review = provider.requests()[1].messages[1].content().to_string();
        assert!(review.contains("Output of the script:\nHello, World!"));
        assert!(!review.contains("Errors:"));
        assert!(outcome.reason.is_success());
    }

    #[tokio::test]
    async fn test_submission_braces_reach_reviewer_verbatim() {
        let submission = "print(f\"{stderr} {feedback} {stdout}\")";
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::text(submission),
            ScriptedReply::text("Uses undefined names."),
            ScriptedReply::text("print('Hello, World!')"),
            ScriptedReply::text("No issues found."),
        ]);
        let hook = FixedReport(ExecOutput {
            stdout: String::new(),
            stderr: "NameError: name 'stderr' is not defined".into(),
            exit_code: Some(1),
        });
        let prompts = ReviewPrompts {
            review_request: "Review:\n{submission}\nOutput: {stdout}\nErrors: {stderr}".into(),
            ..ReviewPrompts::default()
        };

        review_loop()
            .with_prompts(prompts)
            .run(&provider, &hook, &mut NullSink, &mut NullSink)
            .await;

        let requests = provider.requests();
        let review = requests[1].messages[1].content();
        assert!(review.contains(submission), "submission was rewritten: {}", review);
        assert!(review.ends_with("Errors: NameError: name 'stderr' is not defined"));
        let revision = requests[2].messages[1].content();
        assert!(revision.contains(submission));
        assert!(revision.contains("Uses undefined names."));
    }

    #[tokio::test]
    async fn test_failed_reviewer_stream_continues() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::text("v1"),
            ScriptedReply::chunks(["perf"]).failing_with("reset"),
            ScriptedReply::text("v2"),
            ScriptedReply::text("A+"),
        ]);
        let outcome = review_loop()
            .with_policy(FlushPolicy::every(1).unwrap())
            .run(&provider, &NoHook, &mut NullSink, &mut NullSink)
            .await;

        assert_eq!(outcome.conversation.messages()[1].content(), "perf");
        assert_eq!(outcome.failed_turns().count(), 1);
        assert_eq!(outcome.reason, TerminationReason::PhraseMatched { phrase: "a+".into() });
    }
}
