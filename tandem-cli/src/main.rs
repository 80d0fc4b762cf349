//! # tandem CLI
//!
//! Runs two-model loops against a local model server and streams every turn
//! to the terminal.
//!
//! Usage:
//!   tandem chat [--turns N] [--model M]
//!   tandem review [--task TEXT] [--max-iterations N | --unbounded]
//!   tandem segments [--segment TEXT]...
//!   tandem models
//!
//! Examples:
//!   tandem chat --turns 3
//!   tandem review --author-model codellama --reviewer-model llama3
//!   tandem --provider openai --base-url http://localhost:11434/v1 chat
//!   tandem -c tandem.json segments --segment "Summarize Apple's 2023 results."
//!
//! Exit codes: 0 on success, 1 on configuration or provider errors, 2 when a
//! review loop gives up at its iteration limit.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tandem_agent::{ExecHook, LoopOutcome, TandemConfig, TurnHook};
use tandem_llm::{
    AnyProvider, Error, ExecOutput, FlushPolicy, ProcessExecutor, ProviderType, Result, TerminalSink,
};

#[derive(Parser)]
#[command(name = "tandem")]
#[command(author, version, about = "tandem - two models, one conversation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend: ollama, openai or scripted
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Base URL of the backend
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Chunks per display update
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Update the display on each newline instead of every N chunks
    #[arg(long, global = true)]
    line_flush: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Warnings only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bounded conversation between two participants
    Chat {
        /// Rounds; each participant replies once per round
        #[arg(long)]
        turns: Option<usize>,

        /// Model used by both participants
        #[arg(long)]
        model: Option<String>,

        /// Label of the first participant
        #[arg(long)]
        first: Option<String>,

        /// Label of the second participant
        #[arg(long)]
        second: Option<String>,
    },
    /// Author writes a script, it is run, a reviewer critiques it; repeat
    Review {
        #[arg(long)]
        author_model: Option<String>,

        #[arg(long)]
        reviewer_model: Option<String>,

        /// First message to the author
        #[arg(long)]
        task: Option<String>,

        /// File the author's code is written to
        #[arg(long)]
        file: Option<String>,

        /// Program that runs the file
        #[arg(long)]
        interpreter: Option<String>,

        /// Directory the file is written to and run in
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Give up after this many submissions
        #[arg(long, conflicts_with = "unbounded")]
        max_iterations: Option<usize>,

        /// Keep going until the reviewer is satisfied
        #[arg(long)]
        unbounded: bool,
    },
    /// Answer and critique each segment in turn
    Segments {
        /// A segment prompt; repeat for more
        #[arg(long = "segment")]
        segments: Vec<String>,

        #[arg(long)]
        responder_model: Option<String>,

        #[arg(long)]
        critic_model: Option<String>,
    },
    /// List models available on the local server
    Models,
}

fn init_logging(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

/// Apply the global flags on top of the file config
fn apply_overrides(config: &mut TandemConfig, cli: &Cli) -> Result<()> {
    if let Some(name) = &cli.provider {
        config.provider.kind = name.parse::<ProviderType>()?;
    }
    if let Some(url) = &cli.base_url {
        config.provider.base_url = Some(url.clone());
    }
    if let Some(size) = cli.batch_size {
        config.flush.batch_size = size;
    }
    if cli.line_flush {
        config.flush.on_newline = true;
    }
    Ok(())
}

/// Shows each execution report as it happens
struct EchoingHook<H> {
    inner: H,
    quiet: bool,
}

impl<H: TurnHook> TurnHook for EchoingHook<H> {
    async fn after_submission(&self, iteration: usize, submission: &str) -> Option<ExecOutput> {
        let report = self.inner.after_submission(iteration, submission).await;
        if let (Some(report), false) = (&report, self.quiet) {
            println!("\n── execution #{} ──", iteration);
            println!("Output: {}", report.stdout);
            if !report.stderr.is_empty() {
                println!("Error: {}", report.stderr);
            }
        }
        report
    }
}

fn print_summary(outcome: &LoopOutcome, quiet: bool) {
    if quiet {
        return;
    }
    println!("\n\n--- {} ({} iterations, {} turns) ---", outcome.reason, outcome.iterations, outcome.turns.len());
    let failed = outcome.failed_turns().count();
    if failed > 0 {
        println!("{} turn(s) ended with a stream error", failed);
    }
    if outcome.usage.total_calls > 0 {
        println!(
            "tokens: {} prompt, {} completion",
            outcome.usage.total_prompt_tokens, outcome.usage.total_completion_tokens
        );
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = TandemConfig::load_or_default(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli)?;

    let quiet = cli.quiet;
    match cli.command {
        Commands::Chat { turns, model, first, second } => {
            if let Some(turns) = turns {
                config.chat.turns = turns;
            }
            if let Some(model) = model {
                config.chat.model = model;
            }
            if let Some(first) = first {
                config.chat.first_label = first;
            }
            if let Some(second) = second {
                config.chat.second_label = second;
            }
            let (provider, policy) = setup(&config)?;

            let chat = config.chat.build_loop(policy)?;
            let mut first = TerminalSink::stdout(config.chat.first_label.as_str());
            let mut second = TerminalSink::stdout(config.chat.second_label.as_str());
            let outcome = chat
                .run(&provider, config.chat.opening_conversation(), &mut [&mut first, &mut second])
                .await?;
            print_summary(&outcome, quiet);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Review {
            author_model,
            reviewer_model,
            task,
            file,
            interpreter,
            workdir,
            max_iterations,
            unbounded,
        } => {
            let review = &mut config.review;
            if let Some(model) = author_model {
                review.author_model = model;
            }
            if let Some(model) = reviewer_model {
                review.reviewer_model = model;
            }
            if let Some(task) = task {
                review.task = task;
            }
            if let Some(file) = file {
                review.script_name = file;
            }
            if let Some(interpreter) = interpreter {
                review.interpreter = interpreter;
            }
            if let Some(workdir) = workdir {
                review.workdir = workdir.display().to_string();
            }
            if unbounded {
                review.max_iterations = None;
            } else if max_iterations.is_some() {
                review.max_iterations = max_iterations;
            }
            let (provider, policy) = setup(&config)?;

            let review = &config.review;
            let executor = ProcessExecutor::new(review.workdir.as_str()).with_interpreter(review.interpreter.as_str());
            let mut exec = ExecHook::new(executor, review.script_name.as_str());
            if !review.extract_code {
                exec = exec.raw();
            }
            let hook = EchoingHook { inner: exec, quiet };

            let mut author = TerminalSink::stdout("author");
            let mut reviewer = TerminalSink::stdout("reviewer");
            let outcome = review
                .build_loop(policy)?
                .run(&provider, &hook, &mut author, &mut reviewer)
                .await;
            print_summary(&outcome, quiet);
            Ok(if outcome.reason.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Commands::Segments {
            segments,
            responder_model,
            critic_model,
        } => {
            if !segments.is_empty() {
                config.segments.segments = segments;
            }
            if let Some(model) = responder_model {
                config.segments.responder_model = model;
            }
            if let Some(model) = critic_model {
                config.segments.critic_model = model;
            }
            let (provider, policy) = setup(&config)?;

            let mut intern = TerminalSink::stdout("intern");
            let mut manager = TerminalSink::stdout("manager");
            let outcome = config
                .segments
                .build(policy)
                .run(&provider, &config.segments.segments, &mut intern, &mut manager)
                .await;
            print_summary(&outcome, quiet);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Models => {
            let (provider, _) = setup(&config)?;
            let AnyProvider::Ollama(ollama) = &provider else {
                return Err(Error::unsupported(format!(
                    "listing models needs the ollama provider, not {}",
                    config.provider.kind.as_str()
                )));
            };
            let models = ollama.list_models().await.map_err(|e| e.into_error())?;
            if models.is_empty() {
                println!("(no models installed)");
            }
            for model in models {
                println!("{}", model);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Validate the final config and connect the provider
fn setup(config: &TandemConfig) -> Result<(AnyProvider, FlushPolicy)> {
    config.validate()?;
    let policy = config.flush.policy()?;
    let provider = AnyProvider::from_config(config.provider.provider_config()).map_err(|e| e.into_error())?;
    tracing::debug!(provider = config.provider.kind.as_str(), ?policy, "provider ready");
    Ok((provider, policy))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}
