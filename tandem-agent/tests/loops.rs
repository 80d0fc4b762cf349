//! End-to-end loop runs against the scripted provider

use tandem_agent::{
    BoundedLoop, ExecHook, Participant, ReviewConfig, TandemConfig, TerminationReason,
};
use tandem_llm::{
    Conversation, Executor, FlushPolicy, MemorySink, NullSink, ProcessExecutor, Role, ScriptedProvider,
    ScriptedReply,
};
use tempfile::TempDir;

#[tokio::test]
async fn bounded_loop_grows_conversation_in_alternation() {
    let provider = ScriptedProvider::new(
        ["Is it a big city?", "Very big.", "Is it in Europe?", "No, in Asia."].map(ScriptedReply::text),
    );
    let config = TandemConfig::default();
    let mut chat = config.chat.clone();
    chat.turns = 2;
    let opening = chat.opening_conversation();
    let (mut first, mut second) = (MemorySink::new(), MemorySink::new());

    let outcome = chat
        .build_loop(FlushPolicy::every(2).unwrap())
        .unwrap()
        .run(&provider, opening, &mut [&mut first, &mut second])
        .await
        .unwrap();

    let appended = &outcome.conversation.messages()[2..];
    assert_eq!(appended.len(), 4);
    assert!(appended.iter().all(|m| m.role() == Role::Assistant));
    assert_eq!(appended[1].content(), "Very big.");
    assert_eq!(first.updates().last().copied(), Some("Is it in Europe?"));
    assert_eq!(second.updates().last().copied(), Some("No, in Asia."));
    assert_eq!(outcome.reason, TerminationReason::TurnsExhausted);
}

#[tokio::test]
async fn review_loop_stops_on_first_clean_review() {
    let provider = ScriptedProvider::new(vec![
        ScriptedReply::text("print('Hello, World!')"),
        ScriptedReply::text("Looks good, no issues found."),
    ]);
    let review = ReviewConfig::default().build_loop(FlushPolicy::default()).unwrap();

    let outcome = review
        .run(&provider, &tandem_agent::NoHook, &mut NullSink, &mut NullSink)
        .await;

    assert_eq!(outcome.conversation.len(), 2);
    assert!(outcome.reason.is_success());
    assert_eq!(provider.remaining(), 0);
}

#[tokio::test]
async fn review_loop_runs_submissions_through_executor() {
    let dir = TempDir::new().unwrap();
    let hook = ExecHook::new(ProcessExecutor::new(dir.path()).with_interpreter("cat"), "hello_world.py");
    let provider = ScriptedProvider::new(vec![
        ScriptedReply::text("Here it is:\n```python\nprint('Hello, World!')\n```"),
        ScriptedReply::text("The Assignment Is Completed."),
    ]);
    let review = ReviewConfig::default().build_loop(FlushPolicy::default()).unwrap();

    let outcome = review.run(&provider, &hook, &mut NullSink, &mut NullSink).await;

    let written = std::fs::read_to_string(dir.path().join("hello_world.py")).unwrap();
    assert_eq!(written, "print('Hello, World!')");
    let review_request = provider.requests()[1].messages[1].content().to_string();
    assert!(review_request.contains("Output of the script:\nprint('Hello, World!')"));
    assert_eq!(
        outcome.reason,
        TerminationReason::PhraseMatched { phrase: "assignment is completed".into() }
    );
}

#[tokio::test]
async fn missing_resource_is_reported_and_loop_proceeds() {
    let dir = TempDir::new().unwrap();
    let executor = ProcessExecutor::new(dir.path()).with_interpreter("cat");
    let direct = executor.execute("does_not_exist.py").await;
    assert!(direct.stdout.is_empty());
    assert!(!direct.stderr.is_empty());

    let hook = ExecHook::new(
        ProcessExecutor::new(dir.path()).with_interpreter("tandem-no-such-interpreter"),
        "hello_world.py",
    );
    let provider = ScriptedProvider::new(vec![
        ScriptedReply::text("print('hi')"),
        ScriptedReply::text("It fails to run."),
        ScriptedReply::text("print('Hello, World!')"),
        ScriptedReply::text("Perfect!"),
    ]);
    let review = ReviewConfig::default().build_loop(FlushPolicy::default()).unwrap();

    let outcome = review.run(&provider, &hook, &mut NullSink, &mut NullSink).await;

    let first_review = provider.requests()[1].messages[1].content().to_string();
    assert!(first_review.contains("Errors:\nfailed to run 'tandem-no-such-interpreter'"));
    assert_eq!(outcome.iterations, 2);
    assert!(outcome.reason.is_success());
}

#[tokio::test]
async fn review_loop_gives_up_at_iteration_limit() {
    let provider = ScriptedProvider::new(["v1", "Needs work.", "v2", "Still needs work."].map(ScriptedReply::text));
    let mut config = ReviewConfig::default();
    config.max_iterations = Some(2);

    let outcome = config
        .build_loop(FlushPolicy::default())
        .unwrap()
        .run(&provider, &tandem_agent::NoHook, &mut NullSink, &mut NullSink)
        .await;

    assert_eq!(outcome.reason, TerminationReason::IterationLimit { limit: 2 });
    assert!(!outcome.reason.is_success());
}

#[tokio::test]
async fn segmented_review_with_defaults() {
    let provider = ScriptedProvider::echo();
    let config = TandemConfig::default();

    let outcome = config
        .segments
        .build(FlushPolicy::default())
        .run(&provider, &config.segments.segments, &mut NullSink, &mut NullSink)
        .await;

    assert_eq!(outcome.conversation.len(), 8);
    assert_eq!(outcome.iterations, 4);
    assert_eq!(outcome.conversation.messages()[0].content(), config.segments.segments[0]);
}

#[tokio::test]
async fn single_participant_bounded_loop() {
    let provider = ScriptedProvider::echo();
    let opening = Conversation::from(vec![tandem_llm::Message::user("echo me")]);

    let outcome = BoundedLoop::new(vec![Participant::new("solo", "llama3")], 3)
        .unwrap()
        .run(&provider, opening, &mut [&mut NullSink])
        .await
        .unwrap();

    assert_eq!(outcome.conversation.len(), 4);
    assert!(outcome.conversation.iter().all(|m| m.content() == "echo me"));
}
