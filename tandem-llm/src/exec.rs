//! Persisting generated text and running it
//!
//! Execution failures are data, not errors: a script that cannot be started
//! comes back as an `ExecOutput` with empty stdout and a description in
//! stderr, so a loop can show it and keep going.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Captured output of one execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process never ran or was killed by a signal
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    /// Output for an invocation that never produced a process
    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: description.into(),
            exit_code: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && self.stderr.is_empty()
    }
}

/// Somewhere generated text can be written and run
#[allow(async_fn_in_trait)]
pub trait Executor: Send + Sync {
    /// Write `content` under `name`, replacing any previous content
    async fn persist(&self, name: &str, content: &str) -> Result<()>;

    /// Run what was stored under `name`
    async fn execute(&self, name: &str) -> ExecOutput;
}

/// Writes files into a working directory and runs them with an interpreter
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    workdir: PathBuf,
    interpreter: String,
}

impl ProcessExecutor {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            interpreter: "python".to_string(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Resolve `name` inside the working directory
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let plain = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !plain {
            return Err(Error::invalid_argument(format!(
                "resource name '{}' must be a relative path inside the working directory",
                name
            ))
            .with_context("resource", name));
        }
        Ok(self.workdir.join(relative))
    }
}

impl Executor for ProcessExecutor {
    async fn persist(&self, name: &str, content: &str) -> Result<()> {
        let path = self.path_for(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::from(e).with_operation("executor::persist"))?;
        }
        tokio::fs::write(&path, content).await.map_err(|e| {
            Error::from(e)
                .with_operation("executor::persist")
                .with_context("path", path.display().to_string())
        })?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "persisted");
        Ok(())
    }

    async fn execute(&self, name: &str) -> ExecOutput {
        let path = match self.path_for(name) {
            Ok(path) => path,
            Err(e) => return ExecOutput::failed(e.message().to_string()),
        };

        // The child already runs inside the working directory
        let result = tokio::process::Command::new(&self.interpreter)
            .arg(name)
            .current_dir(&self.workdir)
            .output()
            .await;

        match result {
            Ok(output) => {
                let out = ExecOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    exit_code: output.status.code(),
                };
                tracing::debug!(
                    interpreter = %self.interpreter,
                    path = %path.display(),
                    exit_code = ?out.exit_code,
                    "executed"
                );
                out
            }
            Err(e) => {
                tracing::warn!(interpreter = %self.interpreter, error = %e, "could not start interpreter");
                ExecOutput::failed(format!("failed to run '{}': {}", self.interpreter, e))
            }
        }
    }
}

/// Pull the code out of a chat reply.
///
/// Prefers the first fenced block with a language tag, then the first fenced
/// block of any kind, then the whole reply. An unterminated fence runs to the
/// end of the text.
pub fn extract_code_block(text: &str) -> String {
    let mut blocks: Vec<(bool, String)> = Vec::new();
    let mut open: Option<(bool, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(info) = line.trim_start().strip_prefix("```") {
            match open.take() {
                Some((tagged, lines)) => blocks.push((tagged, lines.join("\n"))),
                None => open = Some((!info.trim().is_empty(), Vec::new())),
            }
        } else if let Some((_, lines)) = open.as_mut() {
            lines.push(line);
        }
    }
    if let Some((tagged, lines)) = open {
        blocks.push((tagged, lines.join("\n")));
    }

    blocks
        .iter()
        .find(|(tagged, _)| *tagged)
        .or_else(|| blocks.first())
        .map(|(_, body)| body.clone())
        .unwrap_or_else(|| text.trim().to_string())
}
