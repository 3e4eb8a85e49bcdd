//! Line dispatcher: built-in control verbs and delegation to job creation.
//!
//! `exit`, `logout`, `quit`, `jobs`, `fg`, `bg` and `kill` are handled
//! here; every other line becomes a job. Errors are rendered as one line on
//! the session's terminal and never end the session.

use std::sync::Arc;

use tracing::debug;

use super::command::CommandRegistry;
use super::controller::JobController;
use super::job::Job;
use super::session::Session;
use super::token::{first_text, second_text, tokenize, CliToken};
use crate::models::job::{JobId, JobStatus};

/// What the shell should do after a line has been handled.
#[derive(Clone)]
pub enum Dispatch {
    /// Read the next line.
    Continue,
    /// Close the terminal.
    Exit,
    /// Wait for this job to release the terminal, then read the next line.
    Foreground(Arc<Job>),
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => f.write_str("Continue"),
            Self::Exit => f.write_str("Exit"),
            Self::Foreground(job) => write!(f, "Foreground({})", job.id()),
        }
    }
}

/// Parse `%3` or `3` into a job id.
#[must_use]
pub fn parse_job_id(arg: &str) -> Option<JobId> {
    arg.strip_prefix('%').unwrap_or(arg).parse().ok().map(JobId)
}

/// Per-session line handler.
pub struct LineDispatcher {
    controller: Arc<JobController>,
    registry: Arc<CommandRegistry>,
    session: Arc<Session>,
}

impl LineDispatcher {
    /// Dispatcher acting on behalf of `session`.
    #[must_use]
    pub fn new(
        controller: Arc<JobController>,
        registry: Arc<CommandRegistry>,
        session: Arc<Session>,
    ) -> Self {
        Self {
            controller,
            registry,
            session,
        }
    }

    /// Handle one input line.
    pub fn dispatch(&self, line: &str) -> Dispatch {
        let tokens = tokenize(line);
        let Some(first) = first_text(&tokens) else {
            return Dispatch::Continue;
        };

        match first.value() {
            "exit" | "logout" | "quit" => Dispatch::Exit,
            "jobs" => self.list_jobs(),
            "fg" => self.foreground(second_text(&tokens)),
            "bg" => self.background(second_text(&tokens)),
            "kill" => self.kill(second_text(&tokens)),
            _ => self.run(tokens),
        }
    }

    fn echo(&self, text: &str) {
        self.session.term().echo(text);
    }

    fn list_jobs(&self) -> Dispatch {
        for job in self.controller.jobs() {
            let current = self.session.is_foreground_job(&job);
            self.session
                .term()
                .write(&job.status_line(job.status(), current));
        }
        Dispatch::Continue
    }

    /// Resolve the job a control verb targets: the explicit id, else the
    /// session's foreground job.
    fn target(&self, verb: &str, arg: Option<&str>) -> Option<Arc<Job>> {
        let job = match arg {
            Some(arg) => parse_job_id(arg).and_then(|id| self.controller.get_job(id)),
            None => self.session.foreground_job(),
        };
        if job.is_none() {
            self.echo(&format!("{}: no such job", arg.unwrap_or(verb)));
        }
        job
    }

    fn foreground(&self, arg: Option<&str>) -> Dispatch {
        let Some(job) = self.target("fg", arg) else {
            return Dispatch::Continue;
        };

        if job.session_id() != self.session.id() {
            self.echo(&format!(
                "job {} doesn't belong to this session, so can not fg it",
                job.id()
            ));
            return Dispatch::Continue;
        }

        let moved = match job.status() {
            JobStatus::Stopped => job.resume(true),
            JobStatus::Running => job.to_foreground(),
            JobStatus::Created | JobStatus::Terminated => {
                self.echo(&format!(
                    "job {} is already terminated, so can not fg it",
                    job.id()
                ));
                return Dispatch::Continue;
            }
        };

        match moved {
            Ok(()) => {
                self.session.set_foreground_job(&job);
                self.echo(job.line());
                Dispatch::Foreground(job)
            }
            Err(err) => {
                self.echo(&err.to_string());
                Dispatch::Continue
            }
        }
    }

    fn background(&self, arg: Option<&str>) -> Dispatch {
        let Some(job) = self.target("bg", arg) else {
            return Dispatch::Continue;
        };

        if job.status() != JobStatus::Stopped {
            self.echo(&format!("job {} is already running", job.id()));
            return Dispatch::Continue;
        }

        match job.resume(false) {
            Ok(()) => {
                let current = self.session.is_foreground_job(&job);
                self.session
                    .term()
                    .write(&job.status_line(JobStatus::Running, current));
            }
            Err(err) => self.echo(&err.to_string()),
        }
        Dispatch::Continue
    }

    fn kill(&self, arg: Option<&str>) -> Dispatch {
        let Some(arg) = arg else {
            self.echo("kill: usage: kill job_id");
            return Dispatch::Continue;
        };

        match parse_job_id(arg).and_then(|id| self.controller.get_job(id)) {
            Some(job) => {
                job.terminate();
                self.echo(&format!("kill job {} success", job.id()));
            }
            None => self.echo(&format!("{arg}: no such job")),
        }
        Dispatch::Continue
    }

    fn run(&self, tokens: Vec<CliToken>) -> Dispatch {
        let job = match self
            .controller
            .create_job(&self.registry, tokens, &self.session)
        {
            Ok(job) => job,
            Err(err) => {
                debug!(session_id = %self.session.id(), %err, "job creation failed");
                self.echo(&err.to_string());
                return Dispatch::Continue;
            }
        };

        if let Err(err) = job.run() {
            self.echo(&err.to_string());
            return Dispatch::Continue;
        }

        if job.run_in_background() {
            Dispatch::Continue
        } else {
            self.session.set_foreground_job(&job);
            Dispatch::Foreground(job)
        }
    }
}
