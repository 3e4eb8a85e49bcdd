//! One-shot completion signal with registered waiters.
//!
//! A [`Completion`] starts pending and fires exactly once. Callbacks
//! registered before it fires run on the completing thread; callbacks
//! registered afterwards run immediately on the registering thread. Async
//! callers use [`Completion::wait`].

use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

type Waiter = Box<dyn FnOnce() + Send>;

enum State {
    Pending(Vec<Waiter>),
    Done,
}

/// Single-assignment completion slot.
pub struct Completion {
    state: Mutex<State>,
    done: watch::Sender<bool>,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    /// Create a pending completion.
    #[must_use]
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            state: Mutex::new(State::Pending(Vec::new())),
            done,
        }
    }

    /// Register a callback to run once the completion fires.
    pub fn on_complete(&self, waiter: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *state {
            State::Pending(waiters) => waiters.push(Box::new(waiter)),
            State::Done => {
                drop(state);
                waiter();
            }
        }
    }

    /// Fire the completion. Returns `false` if it had already fired.
    pub fn complete(&self) -> bool {
        let waiters = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *state, State::Done) {
                State::Pending(waiters) => waiters,
                State::Done => return false,
            }
        };
        self.done.send_replace(true);
        for waiter in waiters {
            waiter();
        }
        true
    }

    /// Whether the completion has fired.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait until the completion fires.
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|done| *done).await;
    }
}
