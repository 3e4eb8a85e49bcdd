//! Command contract and registry.
//!
//! The engine never looks inside a command: it resolves a name to a
//! [`Command`] and calls its process handler with a [`ProcessContext`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock, PoisonError};

use super::process::ProcessContext;

/// A runnable command.
pub trait Command: Send + Sync {
    /// Name the command is invoked by.
    fn name(&self) -> &str;

    /// One-line description for `help`.
    fn summary(&self) -> &str;

    /// Process handler invoked when the owning job starts.
    ///
    /// Output goes through `ctx`. The handler should poll
    /// [`ProcessContext::checkpoint`] between units of work so that
    /// suspension and termination are honoured.
    fn process(&self, ctx: ProcessContext) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Source of commands, looked up by name.
pub trait CommandResolver: Send + Sync {
    /// Find the command named `name`.
    fn resolve(&self, name: &str) -> Option<Arc<dyn Command>>;

    /// Every command this resolver provides.
    fn commands(&self) -> Vec<Arc<dyn Command>>;
}

/// Ordered set of resolvers; the first resolver that knows a name wins.
#[derive(Default)]
pub struct CommandRegistry {
    resolvers: RwLock<Vec<Arc<dyn CommandResolver>>>,
}

impl CommandRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resolver after the existing ones.
    pub fn register(&self, resolver: Arc<dyn CommandResolver>) {
        self.resolvers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resolver);
    }

    /// Resolve `name` against every registered resolver in order.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find_map(|resolver| resolver.resolve(name))
    }

    /// `(name, summary)` for every registered command, in registration order.
    #[must_use]
    pub fn summaries(&self) -> Vec<(String, String)> {
        self.resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flat_map(|resolver| resolver.commands())
            .map(|cmd| (cmd.name().to_owned(), cmd.summary().to_owned()))
            .collect()
    }
}
