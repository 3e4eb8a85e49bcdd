//! Job: the unit of job control.
//!
//! ```text
//! Created ──run──▶ Running ◀──resume── Stopped
//!                     │ ──suspend──────▶  │
//!                     └──terminate──▶ Terminated ◀──terminate──┘
//! ```
//!
//! Status and terminal ownership are guarded by the job's own lock, never by
//! the controller's table lock. Every change is published on a watch channel
//! so the owning shell and the running process can react to it.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use super::future::Completion;
use super::process::Process;
use crate::models::job::{JobId, JobInfo, JobStatus};
use crate::{AppError, Result};

/// Status plus terminal ownership at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSnapshot {
    /// Execution status.
    pub status: JobStatus,
    /// Whether the job currently owns its session's terminal.
    pub foreground: bool,
}

impl JobSnapshot {
    /// Whether the owning shell may read input again.
    #[must_use]
    pub fn releases_terminal(&self) -> bool {
        self.status.is_terminal() || !self.foreground
    }
}

/// A tracked command execution.
pub struct Job {
    id: JobId,
    session_id: String,
    line: String,
    background: bool,
    created_at: DateTime<Utc>,
    state: Mutex<JobSnapshot>,
    published: watch::Sender<JobSnapshot>,
    process: Process,
    cancel: CancellationToken,
    completion: Completion,
    tracker: TaskTracker,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("line", &self.line)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Wrap `process` in a job in the `Created` state.
    #[must_use]
    pub fn new(
        id: JobId,
        session_id: String,
        line: String,
        background: bool,
        process: Process,
        tracker: TaskTracker,
    ) -> Self {
        let initial = JobSnapshot {
            status: JobStatus::Created,
            foreground: false,
        };
        let (published, _) = watch::channel(initial);
        Self {
            id,
            session_id,
            line,
            background,
            created_at: Utc::now(),
            state: Mutex::new(initial),
            published,
            process,
            cancel: CancellationToken::new(),
            completion: Completion::new(),
            tracker,
        }
    }

    /// Job identifier.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Owning session.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Literal command line, without a trailing `&`.
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Whether the job was started with `&`.
    #[must_use]
    pub fn run_in_background(&self) -> bool {
        self.background
    }

    /// The wrapped process.
    #[must_use]
    pub fn process(&self) -> &Process {
        &self.process
    }

    /// Current status and terminal ownership.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        *self.lock()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.snapshot().status
    }

    /// Whether the job currently owns its terminal.
    #[must_use]
    pub fn is_foreground(&self) -> bool {
        self.snapshot().foreground
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.published.subscribe()
    }

    /// Serializable description of the job.
    #[must_use]
    pub fn info(&self) -> JobInfo {
        let snapshot = self.snapshot();
        JobInfo {
            id: self.id,
            session_id: self.session_id.clone(),
            line: self.line.clone(),
            status: snapshot.status,
            background: self.background,
            foreground: snapshot.foreground,
            cache_location: self
                .process
                .cache_location()
                .map(|p| p.display().to_string()),
            created_at: self.created_at,
        }
    }

    /// `jobs` listing line for `status`; `current` marks the session's
    /// foreground job.
    #[must_use]
    pub fn status_line(&self, status: JobStatus, current: bool) -> String {
        let marker = if current { "*" } else { "" };
        format!("[{}]{marker} {} {}\n", self.id, status.label(), self.line)
    }

    /// Start executing: `Created` to `Running`.
    ///
    /// A job not marked for background takes ownership of its terminal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidJobState` unless the job is `Created`.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let foreground = !self.background;
        self.transition("run", |state| {
            if state.status != JobStatus::Created {
                return false;
            }
            state.status = JobStatus::Running;
            state.foreground = foreground;
            true
        })?;

        let ctx = self.process.context(
            self.id,
            &self.session_id,
            self.published.subscribe(),
            self.cancel.clone(),
        );
        let command = self.process.command();
        let output = self.process.output().clone();
        let job = Arc::clone(self);
        let span = info_span!("job", job_id = %self.id, command = command.name());
        self.tracker.spawn(
            async move {
                debug!("process started");
                let outcome = AssertUnwindSafe(command.process(ctx)).catch_unwind().await;
                if outcome.is_err() {
                    warn!("process panicked");
                }
                output.finish();
                job.terminate();
                debug!("process ended");
            }
            .instrument(span),
        );
        info!(job_id = %self.id, session_id = %self.session_id, foreground, "job started");
        Ok(())
    }

    /// Suspend a running job: `Running` to `Stopped`, releasing the terminal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidJobState` unless the job is `Running`.
    pub fn suspend(&self) -> Result<()> {
        self.transition("suspend", |state| {
            if state.status != JobStatus::Running {
                return false;
            }
            state.status = JobStatus::Stopped;
            state.foreground = false;
            true
        })?;
        info!(job_id = %self.id, "job stopped");
        Ok(())
    }

    /// Resume a stopped job: `Stopped` to `Running`, optionally claiming the
    /// terminal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidJobState` unless the job is `Stopped`.
    pub fn resume(&self, foreground: bool) -> Result<()> {
        self.transition("resume", |state| {
            if state.status != JobStatus::Stopped {
                return false;
            }
            state.status = JobStatus::Running;
            state.foreground = foreground;
            true
        })?;
        info!(job_id = %self.id, foreground, "job resumed");
        Ok(())
    }

    /// Claim the terminal for a job running in the background.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidJobState` unless the job is `Running` in the
    /// background.
    pub fn to_foreground(&self) -> Result<()> {
        self.transition("bring to foreground", |state| {
            if state.status != JobStatus::Running || state.foreground {
                return false;
            }
            state.foreground = true;
            true
        })?;
        info!(job_id = %self.id, "job moved to foreground");
        Ok(())
    }

    /// Force the job into `Terminated`, release the terminal and fire the
    /// completion signal.
    ///
    /// Returns `false` if the job was already terminated.
    pub fn terminate(&self) -> bool {
        let previous = {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return false;
            }
            let previous = state.status;
            state.status = JobStatus::Terminated;
            state.foreground = false;
            self.published.send_replace(*state);
            previous
        };

        self.cancel.cancel();
        if previous == JobStatus::Created {
            // No task will ever flush the chain.
            self.process.output().finish();
        }
        self.completion.complete();
        info!(job_id = %self.id, from = %previous, "job terminated");
        true
    }

    /// Register a callback fired once the job terminates.
    pub fn on_terminate(&self, callback: impl FnOnce() + Send + 'static) {
        self.completion.on_complete(callback);
    }

    /// Wait until the job terminates.
    pub async fn wait_terminated(&self) {
        self.completion.wait().await;
    }

    /// Wait until the job stops owning its terminal; returns its status then.
    pub async fn wait_released(&self) -> JobStatus {
        let mut rx = self.published.subscribe();
        let released = rx
            .wait_for(JobSnapshot::releases_terminal)
            .await
            .map(|snapshot| snapshot.status);
        released.unwrap_or_else(|_| self.status())
    }

    fn lock(&self) -> MutexGuard<'_, JobSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(
        &self,
        transition: &'static str,
        apply: impl FnOnce(&mut JobSnapshot) -> bool,
    ) -> Result<JobSnapshot> {
        let mut state = self.lock();
        let mut next = *state;
        if !apply(&mut next) {
            return Err(AppError::InvalidJobState {
                job: self.id.0,
                transition,
                status: state.status.to_string(),
            });
        }
        *state = next;
        self.published.send_replace(next);
        Ok(next)
    }
}
