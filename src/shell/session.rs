//! Client sessions and the registry of live ones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::info;

use super::job::Job;
use crate::term::TermHandle;

/// A logical client bound to one terminal.
pub struct Session {
    id: String,
    term: TermHandle,
    created_at: DateTime<Utc>,
    last_access: Mutex<Instant>,
    foreground: Mutex<Option<Arc<Job>>>,
}

impl Session {
    /// Create a session for `term`; it shares the terminal's identifier.
    #[must_use]
    pub fn new(term: TermHandle) -> Self {
        Self {
            id: term.id().to_owned(),
            term,
            created_at: Utc::now(),
            last_access: Mutex::new(Instant::now()),
            foreground: Mutex::new(None),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Terminal the session is bound to.
    #[must_use]
    pub fn term(&self) -> &TermHandle {
        &self.term
    }

    /// Creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Record activity.
    pub fn touch(&self) {
        *self
            .last_access
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last recorded activity.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_access
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// The job most recently run in, or brought to, the foreground.
    #[must_use]
    pub fn foreground_job(&self) -> Option<Arc<Job>> {
        self.foreground_slot().clone()
    }

    /// Remember `job` as the session's foreground job.
    pub fn set_foreground_job(&self, job: &Arc<Job>) {
        *self.foreground_slot() = Some(Arc::clone(job));
    }

    /// Whether `job` is the session's foreground job.
    #[must_use]
    pub fn is_foreground_job(&self, job: &Job) -> bool {
        self.foreground_slot()
            .as_ref()
            .is_some_and(|current| current.id() == job.id())
    }

    fn foreground_slot(&self) -> MutexGuard<'_, Option<Arc<Job>>> {
        self.foreground.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Live sessions, keyed by id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `session`.
    pub fn register(&self, session: &Arc<Session>) {
        self.lock()
            .insert(session.id().to_owned(), Arc::clone(session));
    }

    /// Stop tracking a session.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().remove(id)
    }

    /// Look up a live session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().get(id).cloned()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close the terminal of every session idle for longer than `timeout`.
    pub fn close_idle(&self, timeout: Duration) -> usize {
        let idle: Vec<Arc<Session>> = self
            .lock()
            .values()
            .filter(|session| session.idle_for() > timeout)
            .cloned()
            .collect();
        for session in &idle {
            info!(session_id = %session.id(), "closing idle session");
            session.term().close();
        }
        idle.len()
    }

    /// Close every session's terminal.
    pub fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self.lock().values().cloned().collect();
        for session in sessions {
            session.term().close();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
