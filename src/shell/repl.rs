//! Per-terminal read loop.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};

use super::command::CommandRegistry;
use super::controller::JobController;
use super::dispatch::{Dispatch, LineDispatcher};
use super::job::Job;
use super::session::{Session, SessionRegistry};
use crate::models::job::JobStatus;
use crate::term::{Term, TermEvent, TermInput};

/// Banner written when a terminal connects.
#[must_use]
pub fn welcome_banner(session_id: &str) -> String {
    format!(
        "jobterm {}\nsession: {session_id}\ntype 'help' for the list of commands.\n",
        env!("CARGO_PKG_VERSION")
    )
}

enum Flow {
    Continue,
    Exit,
}

/// Shell bound to one terminal: reads lines, dispatches them and waits on
/// foreground jobs.
pub struct Shell {
    session: Arc<Session>,
    input: TermInput,
    dispatcher: LineDispatcher,
    controller: Arc<JobController>,
    sessions: Arc<SessionRegistry>,
    prompt: String,
    pending: VecDeque<String>,
}

impl Shell {
    /// Create a shell for a freshly connected terminal and register its
    /// session.
    #[must_use]
    pub fn new(
        term: Term,
        controller: Arc<JobController>,
        registry: Arc<CommandRegistry>,
        sessions: Arc<SessionRegistry>,
        prompt: impl Into<String>,
    ) -> Self {
        let Term { handle, input } = term;
        let session = Arc::new(Session::new(handle));
        sessions.register(&session);
        let dispatcher =
            LineDispatcher::new(Arc::clone(&controller), registry, Arc::clone(&session));
        Self {
            session,
            input,
            dispatcher,
            controller,
            sessions,
            prompt: prompt.into(),
            pending: VecDeque::new(),
        }
    }

    /// The session this shell serves.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Run until the terminal closes or the user exits.
    pub async fn run(mut self) {
        info!(session_id = %self.session.id(), kind = self.session.term().kind(), "session opened");
        self.session
            .term()
            .write(&welcome_banner(self.session.id()));

        while let Some(line) = self.next_line().await {
            self.session.touch();
            let flow = match self.dispatcher.dispatch(&line) {
                Dispatch::Continue => Flow::Continue,
                Dispatch::Exit => Flow::Exit,
                Dispatch::Foreground(job) => self.wait_foreground(&job).await,
            };
            if matches!(flow, Flow::Exit) {
                break;
            }
        }

        self.close();
    }

    /// Prompt, then take the next queued or incoming line. `None` on EOF.
    async fn next_line(&mut self) -> Option<String> {
        loop {
            self.session.term().prompt(&self.prompt);
            if let Some(line) = self.pending.pop_front() {
                return Some(line);
            }
            match self.input.next().await {
                Some(TermEvent::Line(line)) => return Some(line),
                // Nothing owns the terminal; just re-prompt.
                Some(TermEvent::Interrupt | TermEvent::Suspend) => {}
                Some(TermEvent::Eof) | None => return None,
            }
        }
    }

    async fn wait_foreground(&mut self, job: &Arc<Job>) -> Flow {
        loop {
            tokio::select! {
                status = job.wait_released() => {
                    if status == JobStatus::Stopped {
                        self.session
                            .term()
                            .write(&job.status_line(JobStatus::Stopped, true));
                    }
                    return Flow::Continue;
                }
                event = self.input.next() => match event {
                    Some(TermEvent::Interrupt) => {
                        job.terminate();
                    }
                    Some(TermEvent::Suspend) => {
                        if let Err(err) = job.suspend() {
                            debug!(%err, "suspend ignored");
                        }
                    }
                    Some(TermEvent::Line(line)) => self.pending.push_back(line),
                    Some(TermEvent::Eof) | None => {
                        job.terminate();
                        return Flow::Exit;
                    }
                },
            }
        }
    }

    fn close(self) {
        let id = self.session.id().to_owned();
        self.session.term().close();
        self.sessions.remove(&id);
        let reaped = self.controller.reap_session(&id);
        info!(session_id = %id, reaped, "session closed");
    }
}
