//! Configuration file (JSON)
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below. Command-line flags are applied on top by the binary.

use crate::bounded::BoundedLoop;
use crate::phrases::{TerminationPhrases, DEFAULT_TERMINATION_PHRASES};
use crate::review::{ReviewLoop, ReviewPrompts, DEFAULT_MAX_ITERATIONS};
use crate::segments::{SegmentedReview, DEFAULT_FEEDBACK_REQUEST};
use crate::turn::Participant;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tandem_llm::{Conversation, Error, FlushPolicy, Message, ProviderConfig, ProviderType, Result, DEFAULT_BATCH_SIZE};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    pub provider: ProviderSettings,
    pub flush: FlushConfig,
    pub chat: ChatConfig,
    pub review: ReviewConfig,
    pub segments: SegmentsConfig,
}

impl TandemConfig {
    /// Read and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::from(e)
                .with_operation("config::load")
                .with_context("path", path.display().to_string())
        })?;
        let config: TandemConfig = serde_json::from_str(&content).map_err(|e| {
            Error::from(e)
                .with_operation("config::load")
                .with_context("path", path.display().to_string())
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// `load` when a path is given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.flush.policy()?;
        if self.review.max_iterations == Some(0) {
            return Err(Error::config_invalid(
                "review.max_iterations",
                "iteration limit must be at least 1; use null for no limit",
            ));
        }
        if self.review.script_name.trim().is_empty() {
            return Err(Error::config_invalid("review.script_name", "script name must not be empty"));
        }
        Ok(())
    }
}

/// Which backend to talk to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub kind: ProviderType,
    pub base_url: Option<String>,
    /// Falls back to `OPENAI_API_KEY` for the openai provider
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderType::Ollama,
            base_url: None,
            api_key: None,
            model: None,
            timeout_secs: None,
        }
    }
}

impl ProviderSettings {
    pub fn provider_config(&self) -> ProviderConfig {
        let mut config = match self.kind {
            ProviderType::Ollama => ProviderConfig::ollama(),
            ProviderType::OpenAI => {
                let key = self
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                    .unwrap_or_default();
                ProviderConfig::openai(key)
            }
            ProviderType::Scripted => ProviderConfig::scripted(),
        };
        if let Some(url) = &self.base_url {
            config = config.with_base_url(url.as_str());
        }
        if let Some(model) = &self.model {
            config = config.with_model(model.as_str());
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(secs);
        }
        config
    }
}

/// How streamed chunks reach the display
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    pub batch_size: usize,
    /// Flush on newline-bearing chunks instead of every `batch_size` chunks
    pub on_newline: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            on_newline: false,
        }
    }
}

impl FlushConfig {
    pub fn policy(&self) -> Result<FlushPolicy> {
        if self.on_newline {
            return Ok(FlushPolicy::OnNewline);
        }
        FlushPolicy::every(self.batch_size)
    }
}

/// Bounded two-participant conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub turns: usize,
    pub model: String,
    pub first_label: String,
    pub second_label: String,
    /// User messages the conversation starts with
    pub opening: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            turns: 5,
            model: "llama3".to_string(),
            first_label: "first".to_string(),
            second_label: "second".to_string(),
            opening: vec![
                "Your favorite city is London. Your goal is to figure out the other person's favorite city \
                 without directly telling your own. Never ever tell what your favorite city is."
                    .to_string(),
                "Your favorite city is Mumbai. This is your secret which others are trying to figure out. \
                 Let's talk about our favorite cities. What's yours?"
                    .to_string(),
            ],
        }
    }
}

impl ChatConfig {
    pub fn participants(&self) -> Vec<Participant> {
        vec![
            Participant::new(self.first_label.as_str(), self.model.as_str()),
            Participant::new(self.second_label.as_str(), self.model.as_str()),
        ]
    }

    pub fn build_loop(&self, policy: FlushPolicy) -> Result<BoundedLoop> {
        Ok(BoundedLoop::new(self.participants(), self.turns)?.with_policy(policy))
    }

    pub fn opening_conversation(&self) -> Conversation {
        self.opening.iter().map(|m| Message::user(m.as_str())).collect()
    }
}

/// Author/reviewer loop with execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub author_model: String,
    pub reviewer_model: String,
    pub author_system: String,
    pub reviewer_system: String,
    pub task: String,
    pub review_request: String,
    pub revision_request: String,
    /// `null` runs until a termination phrase appears
    pub max_iterations: Option<usize>,
    pub termination_phrases: Vec<String>,
    pub script_name: String,
    pub interpreter: String,
    pub workdir: String,
    /// Persist the first fenced code block instead of the whole reply
    pub extract_code: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        let prompts = ReviewPrompts::default();
        Self {
            author_model: "codellama".to_string(),
            reviewer_model: "llama3".to_string(),
            author_system: "You are a Python developer.".to_string(),
            reviewer_system: "You are a code reviewer.".to_string(),
            task: prompts.task,
            review_request: prompts.review_request,
            revision_request: prompts.revision_request,
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
            termination_phrases: DEFAULT_TERMINATION_PHRASES.iter().map(|p| p.to_string()).collect(),
            script_name: "hello_world.py".to_string(),
            interpreter: "python".to_string(),
            workdir: ".".to_string(),
            extract_code: true,
        }
    }
}

impl ReviewConfig {
    pub fn build_loop(&self, policy: FlushPolicy) -> Result<ReviewLoop> {
        let author = Participant::new("author", self.author_model.as_str())
            .with_system_prompt(self.author_system.as_str());
        let reviewer = Participant::new("reviewer", self.reviewer_model.as_str())
            .with_system_prompt(self.reviewer_system.as_str());
        ReviewLoop::new(author, reviewer)
            .with_prompts(ReviewPrompts {
                task: self.task.clone(),
                review_request: self.review_request.clone(),
                revision_request: self.revision_request.clone(),
            })
            .with_phrases(TerminationPhrases::new(&self.termination_phrases))
            .with_policy(policy)
            .with_max_iterations(self.max_iterations)
    }
}

/// Segmented review
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentsConfig {
    pub responder_model: String,
    pub critic_model: String,
    pub feedback_request: String,
    pub segments: Vec<String>,
}

impl Default for SegmentsConfig {
    fn default() -> Self {
        Self {
            responder_model: "codellama".to_string(),
            critic_model: "llama3".to_string(),
            feedback_request: DEFAULT_FEEDBACK_REQUEST.to_string(),
            segments: [
                "Please write the introduction and background of Apple's operations. Write at most 1 sentence.",
                "Provide a detailed analysis of Apple's financial performance. Write at most 1 sentence.",
                "Discuss the competitive landscape and Apple's market position. Write at most 1 sentence.",
                "Analyze Apple's stock price performance and provide a future outlook. Write at most 1 sentence.",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl SegmentsConfig {
    pub fn build(&self, policy: FlushPolicy) -> SegmentedReview {
        SegmentedReview::new(
            Participant::new("intern", self.responder_model.as_str()),
            Participant::new("manager", self.critic_model.as_str()),
        )
        .with_feedback_request(self.feedback_request.as_str())
        .with_policy(policy)
    }
}
