//! Process: a resolved command bound to its arguments and output chain.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::command::{Command, CommandRegistry};
use super::handler::HandlerChain;
use super::job::JobSnapshot;
use super::token::CliToken;
use crate::models::job::{JobId, JobStatus};

/// Shared writer feeding a process's handler chain.
///
/// Writes are serialized so each chunk fully traverses the chain before the
/// next one enters it.
#[derive(Clone)]
pub struct ProcessOutput {
    chain: Arc<Mutex<HandlerChain>>,
}

impl ProcessOutput {
    /// Wrap `chain`.
    #[must_use]
    pub fn new(chain: HandlerChain) -> Self {
        Self {
            chain: Arc::new(Mutex::new(chain)),
        }
    }

    /// Send `text` through the chain.
    pub fn write(&self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        self.chain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(text);
    }

    /// Flush every stage; further writes are dropped.
    pub fn finish(&self) {
        self.chain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish();
    }

    /// Number of stages in the chain.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Execution unit owned by exactly one job.
pub struct Process {
    command: Arc<dyn Command>,
    tokens: Vec<CliToken>,
    output: ProcessOutput,
    cache_location: Option<PathBuf>,
    registry: Arc<CommandRegistry>,
}

impl Process {
    /// Bind `command` to its argument tokens and output chain.
    #[must_use]
    pub fn new(
        command: Arc<dyn Command>,
        tokens: Vec<CliToken>,
        output: ProcessOutput,
        cache_location: Option<PathBuf>,
        registry: Arc<CommandRegistry>,
    ) -> Self {
        Self {
            command,
            tokens,
            output,
            cache_location,
            registry,
        }
    }

    /// Name of the resolved command.
    #[must_use]
    pub fn command_name(&self) -> &str {
        self.command.name()
    }

    /// Argument tokens following the command name, blanks included.
    #[must_use]
    pub fn tokens(&self) -> &[CliToken] {
        &self.tokens
    }

    /// Cache file receiving the output, when redirected without a file name.
    #[must_use]
    pub fn cache_location(&self) -> Option<&Path> {
        self.cache_location.as_deref()
    }

    /// Output writer.
    #[must_use]
    pub fn output(&self) -> &ProcessOutput {
        &self.output
    }

    pub(crate) fn command(&self) -> Arc<dyn Command> {
        Arc::clone(&self.command)
    }

    pub(crate) fn context(
        &self,
        job_id: JobId,
        session_id: &str,
        status: watch::Receiver<JobSnapshot>,
        cancel: CancellationToken,
    ) -> ProcessContext {
        ProcessContext {
            job_id,
            session_id: session_id.to_owned(),
            args: self
                .tokens
                .iter()
                .filter(|t| t.is_text())
                .map(|t| t.value().to_owned())
                .collect(),
            tokens: self.tokens.clone(),
            output: self.output.clone(),
            status,
            cancel,
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Everything a command's process handler can see.
pub struct ProcessContext {
    job_id: JobId,
    session_id: String,
    args: Vec<String>,
    tokens: Vec<CliToken>,
    output: ProcessOutput,
    status: watch::Receiver<JobSnapshot>,
    cancel: CancellationToken,
    registry: Arc<CommandRegistry>,
}

impl ProcessContext {
    /// Owning job.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Session that created the job.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Unquoted argument values.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Raw argument tokens.
    #[must_use]
    pub fn tokens(&self) -> &[CliToken] {
        &self.tokens
    }

    /// Write text to the output chain.
    pub fn write(&self, text: impl Into<String>) {
        self.output.write(text);
    }

    /// Write one line to the output chain.
    pub fn println(&self, line: impl AsRef<str>) {
        self.output.write(format!("{}\n", line.as_ref()));
    }

    /// Commands known to the registry, as `(name, summary)`.
    #[must_use]
    pub fn commands(&self) -> Vec<(String, String)> {
        self.registry.summaries()
    }

    /// Whether the job has been terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the job is terminated.
    pub async fn terminated(&self) {
        self.cancel.cancelled().await;
    }

    /// Block while the job is stopped.
    ///
    /// Returns `false` once the job has been terminated, in which case the
    /// handler should return promptly.
    pub async fn checkpoint(&mut self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if self.status.borrow().status != JobStatus::Stopped {
                return true;
            }
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                changed = self.status.changed() => {
                    if changed.is_err() {
                        return !self.cancel.is_cancelled();
                    }
                }
            }
        }
    }
}
