//! Shared fixtures for integration tests.
//!
//! Provides test commands, an in-memory shell harness, and helpers for
//! byte-stream terminals so individual modules can focus on behaviour.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use jobterm::commands::BuiltinCommands;
use jobterm::config::GlobalConfig;
use jobterm::shell::command::{Command, CommandRegistry, CommandResolver};
use jobterm::shell::controller::JobController;
use jobterm::shell::process::ProcessContext;
use jobterm::shell::repl::Shell;
use jobterm::shell::session::SessionRegistry;
use jobterm::term::{Term, TermEvent, TermIo, TermOutput};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Build a `GlobalConfig` with every transport disabled and caches under
/// `cache_root`.
pub fn test_config(cache_root: &Path) -> GlobalConfig {
    let toml = format!(
        r#"
ip = "127.0.0.1"
telnet_port = 0
http_port = 0
session_timeout_seconds = 0
request_timeout_ms = 2000
shutdown_grace_ms = 2000
cache_root = '{root}'
"#,
        root = cache_root.display(),
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

/// Find a free TCP port by binding an ephemeral listener and dropping it.
pub async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

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

/// Resolver providing `lines` and `spin`.
pub struct TestCommands;

impl CommandResolver for TestCommands {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands().into_iter().find(|c| c.name() == name)
    }

    fn commands(&self) -> Vec<Arc<dyn Command>> {
        vec![Arc::new(Lines), Arc::new(Spin)]
    }
}

/// Registry with the built-ins followed by the test commands.
pub fn test_registry() -> Arc<CommandRegistry> {
    let registry = Arc::new(CommandRegistry::new());
    registry.register(Arc::new(BuiltinCommands::new()));
    registry.register(Arc::new(TestCommands));
    registry
}

/// A shell running on an in-memory terminal.
pub struct ShellHarness {
    pub session_id: String,
    io: TermIo,
    task: JoinHandle<()>,
}

impl ShellHarness {
    /// Start a shell sharing `controller` and `sessions`.
    pub fn start(
        controller: &Arc<JobController>,
        registry: &Arc<CommandRegistry>,
        sessions: &Arc<SessionRegistry>,
    ) -> Self {
        let (term, io) = Term::pair("test");
        let shell = Shell::new(
            term,
            Arc::clone(controller),
            Arc::clone(registry),
            Arc::clone(sessions),
            "$ ",
        );
        let session_id = shell.session().id().to_owned();
        let task = tokio::spawn(shell.run());
        Self {
            session_id,
            io,
            task,
        }
    }

    /// Output up to the next prompt. Panics if the terminal closes first.
    pub async fn until_prompt(&mut self) -> String {
        let (text, closed) = self.collect().await;
        assert!(!closed, "terminal closed while waiting for a prompt: {text:?}");
        text
    }

    /// Output up to the terminal closing. Panics on a prompt.
    pub async fn until_closed(&mut self) -> String {
        let (text, closed) = self.collect().await;
        assert!(closed, "prompted while waiting for close: {text:?}");
        text
    }

    async fn collect(&mut self) -> (String, bool) {
        let mut text = String::new();
        loop {
            let next = tokio::time::timeout(WAIT, self.io.output.recv())
                .await
                .unwrap_or_else(|_| panic!("no prompt within {WAIT:?}; got {text:?}"));
            match next {
                Some(TermOutput::Text(chunk)) => text.push_str(&chunk),
                Some(TermOutput::Prompt(_)) => return (text, false),
                Some(TermOutput::Close) | None => return (text, true),
            }
        }
    }

    /// Send an input event without waiting for output.
    pub async fn send(&self, event: TermEvent) {
        self.io.events.send(event).await.expect("shell alive");
    }

    /// Send `line` and return the output up to the next prompt.
    pub async fn exec(&mut self, line: &str) -> String {
        self.send(TermEvent::Line(line.to_owned())).await;
        self.until_prompt().await
    }

    /// Wait for the shell task to finish.
    pub async fn join(self) {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("shell finished")
            .expect("shell did not panic");
    }
}

/// Read from `reader` until the accumulated text ends with `suffix`.
pub async fn read_until<R: AsyncRead + Unpin>(reader: &mut R, suffix: &str) -> String {
    let mut text = String::new();
    let mut buf = [0_u8; 1024];
    while !text.ends_with(suffix) {
        let n = tokio::time::timeout(WAIT, reader.read(&mut buf))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {suffix:?}; got {text:?}"))
            .expect("read");
        assert!(n > 0, "stream closed before {suffix:?}; got {text:?}");
        text.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    text
}

/// Read from `reader` until end of stream.
pub async fn read_to_end<R: AsyncRead + Unpin>(reader: &mut R) -> String {
    let mut bytes = Vec::new();
    tokio::time::timeout(WAIT, reader.read_to_end(&mut bytes))
        .await
        .expect("stream closed in time")
        .expect("read");
    String::from_utf8_lossy(&bytes).into_owned()
}
