//! Commands and fixtures shared by the unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use jobterm::commands::BuiltinCommands;
use jobterm::shell::command::{Command, CommandRegistry, CommandResolver};
use jobterm::shell::controller::JobController;
use jobterm::shell::job::Job;
use jobterm::shell::process::ProcessContext;
use jobterm::shell::session::Session;
use jobterm::shell::token::tokenize;
use jobterm::term::{Term, TermIo, TermOutput};
use jobterm::Result;

/// `lines a b c` prints each argument on its own line.
struct Lines;

impl Command for Lines {
    fn name(&self) -> &str {
        "lines"
    }

    fn summary(&self) -> &str {
        "print each argument on its own line"
    }

    fn process(&self, ctx: ProcessContext) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            for arg in ctx.args() {
                ctx.println(arg);
            }
        })
    }
}

/// `spin` runs until terminated, yielding at every checkpoint.
struct Spin;

impl Command for Spin {
    fn name(&self) -> &str {
        "spin"
    }

    fn summary(&self) -> &str {
        "run until terminated"
    }

    fn process(&self, mut ctx: ProcessContext) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            while ctx.checkpoint().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    }
}

/// `boom` writes one line, then panics.
struct Boom;

impl Command for Boom {
    fn name(&self) -> &str {
        "boom"
    }

    fn summary(&self) -> &str {
        "panic mid-run"
    }

    fn process(&self, ctx: ProcessContext) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            ctx.println("before");
            panic!("boom");
        })
    }
}

/// `chunks a b` writes each argument as one chunk; a literal `\n` becomes a newline.
struct Chunks;

impl Command for Chunks {
    fn name(&self) -> &str {
        "chunks"
    }

    fn summary(&self) -> &str {
        "write each argument as its own chunk"
    }

    fn process(&self, ctx: ProcessContext) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            for arg in ctx.args() {
                ctx.write(arg.replace("\\n", "\n"));
            }
        })
    }
}

pub struct TestCommands {
    commands: Vec<Arc<dyn Command>>,
}

impl TestCommands {
    pub fn new() -> Self {
        Self {
            commands: vec![
                Arc::new(Lines),
                Arc::new(Spin),
                Arc::new(Boom),
                Arc::new(Chunks),
            ],
        }
    }
}

impl CommandResolver for TestCommands {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.iter().find(|c| c.name() == name).cloned()
    }

    fn commands(&self) -> Vec<Arc<dyn Command>> {
        self.commands.clone()
    }
}

/// Registry with the built-ins followed by the test commands.
pub fn registry() -> Arc<CommandRegistry> {
    let registry = Arc::new(CommandRegistry::new());
    registry.register(Arc::new(BuiltinCommands::new()));
    registry.register(Arc::new(TestCommands::new()));
    registry
}

/// A session on an in-memory terminal, with the transport end kept alive.
pub fn session() -> (Arc<Session>, TermIo) {
    let (term, io) = Term::pair("test");
    (Arc::new(Session::new(term.handle)), io)
}

/// Tokenize `line` and create a job for it.
pub fn create(
    controller: &JobController,
    registry: &Arc<CommandRegistry>,
    session: &Session,
    line: &str,
) -> Result<Arc<Job>> {
    controller.create_job(registry, tokenize(line), session)
}

/// Wait (bounded) for `job` to terminate.
pub async fn wait_terminated(job: &Job) {
    tokio::time::timeout(Duration::from_secs(5), job.wait_terminated())
        .await
        .expect("job terminated in time");
}

/// Text already written to the terminal.
pub fn drain_text(io: &mut TermIo) -> String {
    let mut text = String::new();
    while let Ok(out) = io.output.try_recv() {
        if let TermOutput::Text(chunk) = out {
            text.push_str(&chunk);
        }
    }
    text
}
