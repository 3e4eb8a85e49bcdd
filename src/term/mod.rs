//! Transport-agnostic terminal abstraction.
//!
//! A [`Term`] is a pair of channels: the shell side reads [`TermEvent`]s
//! from a [`TermInput`] and writes through a cloneable [`TermHandle`]; the
//! transport side owns the matching [`TermIo`] and turns bytes or requests
//! into events and [`TermOutput`] back into bytes or responses. The job
//! control core never sees transport bytes.
//!
//! A [`TermServer`] accepts connections for one transport and hands each
//! new `Term` to a [`TermHandler`].

pub mod codec;
pub mod http;
pub mod local;
pub mod stream;
pub mod telnet;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::Result;

/// Capacity of the inbound event queue per terminal.
const EVENT_QUEUE: usize = 64;

/// Input produced by a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermEvent {
    /// A complete input line, without its terminator.
    Line(String),
    /// Interrupt key (Ctrl-C).
    Interrupt,
    /// Suspend key (Ctrl-Z).
    Suspend,
    /// End of input.
    Eof,
}

/// Output sent to a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermOutput {
    /// Text to display.
    Text(String),
    /// The shell is ready for the next line.
    Prompt(String),
    /// The shell closed the terminal.
    Close,
}

/// Callback receiving each newly accepted terminal.
pub type TermHandler = Arc<dyn Fn(Term) + Send + Sync>;

/// Shell-side write half of a terminal.
#[derive(Debug, Clone)]
pub struct TermHandle {
    id: String,
    kind: &'static str,
    tx: mpsc::UnboundedSender<TermOutput>,
    closed: CancellationToken,
}

impl TermHandle {
    /// Terminal identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Transport kind that produced this terminal.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Write command output verbatim.
    pub fn write(&self, text: &str) {
        if text.is_empty() || self.closed.is_cancelled() {
            return;
        }
        if self.tx.send(TermOutput::Text(text.to_owned())).is_err() {
            tracing::debug!(term_id = %self.id, "write to detached terminal dropped");
        }
    }

    /// Write a shell message, terminating it with a newline.
    pub fn echo(&self, text: &str) {
        if text.ends_with('\n') {
            self.write(text);
        } else {
            self.write(&format!("{text}\n"));
        }
    }

    /// Signal readiness for the next line.
    pub fn prompt(&self, prompt: &str) {
        if !self.closed.is_cancelled() {
            let _ = self.tx.send(TermOutput::Prompt(prompt.to_owned()));
        }
    }

    /// Close the terminal. Idempotent.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            let _ = self.tx.send(TermOutput::Close);
            self.closed.cancel();
        }
    }

    /// Whether the terminal has been closed from either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Shell-side read half of a terminal.
#[derive(Debug)]
pub struct TermInput {
    rx: mpsc::Receiver<TermEvent>,
    closed: CancellationToken,
}

impl TermInput {
    /// Next input event; `None` once the terminal is closed or gone.
    pub async fn next(&mut self) -> Option<TermEvent> {
        tokio::select! {
            biased;
            event = self.rx.recv() => event,
            () = self.closed.cancelled() => None,
        }
    }
}

/// A connected terminal as seen by the shell.
#[derive(Debug)]
pub struct Term {
    /// Write half.
    pub handle: TermHandle,
    /// Read half.
    pub input: TermInput,
}

/// Transport-side end of a terminal.
#[derive(Debug)]
pub struct TermIo {
    /// Inbound events toward the shell.
    pub events: mpsc::Sender<TermEvent>,
    /// Outbound shell output.
    pub output: mpsc::UnboundedReceiver<TermOutput>,
    /// Fires when either side closes the terminal.
    pub closed: CancellationToken,
}

impl Term {
    /// Create a connected terminal pair for transport `kind`.
    #[must_use]
    pub fn pair(kind: &'static str) -> (Term, TermIo) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let term = Term {
            handle: TermHandle {
                id: Uuid::new_v4().to_string(),
                kind,
                tx: out_tx,
                closed: closed.clone(),
            },
            input: TermInput {
                rx: event_rx,
                closed: closed.clone(),
            },
        };
        let io = TermIo {
            events: event_tx,
            output: out_rx,
            closed,
        };
        (term, io)
    }
}

/// Listener that accepts transport connections and produces terminals.
///
/// `listen` binds exactly one listening resource and returns a description
/// of the bound endpoint; `close` stops accepting and releases it. Both
/// report through their returned `Result` only.
pub trait TermServer: Send + Sync {
    /// Short transport name used in logs.
    fn name(&self) -> &'static str;

    /// Bind and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::TransportBind`](crate::AppError::TransportBind) if
    /// the listener cannot be bound within the configured timeout.
    fn listen(
        &mut self,
        handler: TermHandler,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Stop accepting and release the listening resource.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::TransportBind`](crate::AppError::TransportBind) if
    /// the server was never started.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
