//! Local-socket transport.
//!
//! Listens on a Unix domain socket (Linux/macOS) or a named pipe (Windows)
//! using the `interprocess` crate. A name containing a path separator is
//! treated as a file-system path; anything else is a namespaced name.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use interprocess::local_socket::{
    tokio::prelude::*, GenericFilePath, GenericNamespaced, ListenerOptions, Name,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::stream::pump;
use super::{Term, TermHandler, TermServer};
use crate::{AppError, Result};

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Local-socket term server.
pub struct LocalTermServer {
    name: String,
    connection_timeout: Duration,
    running: Option<Running>,
}

impl LocalTermServer {
    /// Server that will listen on `name`, giving up on the bind after
    /// `connection_timeout`.
    #[must_use]
    pub fn new(name: impl Into<String>, connection_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            connection_timeout,
            running: None,
        }
    }

    fn socket_name(&self) -> Result<Name<'static>> {
        let parsed = if self.name.contains(['/', '\\']) {
            self.name.clone().to_fs_name::<GenericFilePath>()
        } else {
            self.name.clone().to_ns_name::<GenericNamespaced>()
        };
        parsed.map_err(|err| {
            AppError::TransportBind(format!("local: invalid socket name '{}': {err}", self.name))
        })
    }
}

impl TermServer for LocalTermServer {
    fn name(&self) -> &'static str {
        "local"
    }

    fn listen(
        &mut self,
        handler: TermHandler,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            if self.running.is_some() {
                return Err(AppError::TransportBind("local: already listening".into()));
            }

            // Listener creation is a blocking call.
            let options = ListenerOptions::new().name(self.socket_name()?);
            let bind = tokio::task::spawn_blocking(move || options.create_tokio());
            let listener = match tokio::time::timeout(self.connection_timeout, bind).await {
                Ok(Ok(Ok(listener))) => listener,
                Ok(Ok(Err(err))) => {
                    return Err(AppError::TransportBind(format!(
                        "local: failed to listen on '{}': {err}",
                        self.name
                    )))
                }
                Ok(Err(err)) => {
                    return Err(AppError::TransportBind(format!(
                        "local: bind task failed for '{}': {err}",
                        self.name
                    )))
                }
                Err(_) => {
                    return Err(AppError::TransportBind(format!(
                        "local: timed out binding '{}'",
                        self.name
                    )))
                }
            };

            let cancel = CancellationToken::new();
            let name = self.name.clone();
            let token = cancel.clone();
            let task = tokio::spawn(
                async move {
                    loop {
                        tokio::select! {
                            () = token.cancelled() => break,
                            accepted = listener.accept() => match accepted {
                                Ok(stream) => {
                                    let (term, io) = Term::pair("local");
                                    info!(term_id = %term.handle.id(), "local connection accepted");
                                    handler(term);
                                    tokio::spawn(async move {
                                        let (reader, writer) = stream.split();
                                        pump(reader, writer, io).await;
                                    });
                                }
                                Err(err) => warn!(%err, "local accept failed"),
                            },
                        }
                    }
                }
                .instrument(info_span!("local_server", name = %name)),
            );
            info!(name = %self.name, "local server listening");

            self.running = Some(Running { cancel, task });
            Ok(self.name.clone())
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let Some(running) = self.running.take() else {
                return Err(AppError::TransportBind("local: server not started".into()));
            };
            running.cancel.cancel();
            if let Err(err) = running.task.await {
                warn!(%err, "local accept loop ended abnormally");
            }
            info!(name = %self.name, "local server closed");
            Ok(())
        })
    }
}
