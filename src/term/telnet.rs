//! Telnet transport: one TCP listener, one terminal per connection.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::stream::pump;
use super::{Term, TermHandler, TermServer};
use crate::{AppError, Result};

struct Running {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Telnet term server.
pub struct TelnetTermServer {
    ip: String,
    port: u16,
    connection_timeout: Duration,
    running: Option<Running>,
}

impl TelnetTermServer {
    /// Server that will bind `ip:port`; binding must finish within
    /// `connection_timeout`.
    #[must_use]
    pub fn new(ip: impl Into<String>, port: u16, connection_timeout: Duration) -> Self {
        Self {
            ip: ip.into(),
            port,
            connection_timeout,
            running: None,
        }
    }

    /// Bound address while listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }
}

impl TermServer for TelnetTermServer {
    fn name(&self) -> &'static str {
        "telnet"
    }

    fn listen(
        &mut self,
        handler: TermHandler,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            if self.running.is_some() {
                return Err(AppError::TransportBind("telnet: already listening".into()));
            }

            let addr = format!("{}:{}", self.ip, self.port);
            let listener = tokio::time::timeout(self.connection_timeout, TcpListener::bind(&addr))
                .await
                .map_err(|_| AppError::TransportBind(format!("telnet: bind to {addr} timed out")))?
                .map_err(|err| {
                    AppError::TransportBind(format!("telnet: failed to bind {addr}: {err}"))
                })?;
            let local_addr = listener.local_addr()?;

            let cancel = CancellationToken::new();
            let task = tokio::spawn(
                accept_loop(listener, handler, cancel.clone())
                    .instrument(info_span!("telnet_server", %local_addr)),
            );
            info!(%local_addr, "telnet server listening");

            self.running = Some(Running {
                local_addr,
                cancel,
                task,
            });
            Ok(local_addr.to_string())
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let Some(running) = self.running.take() else {
                return Err(AppError::TransportBind("telnet: server not started".into()));
            };
            running.cancel.cancel();
            if let Err(err) = running.task.await {
                warn!(%err, "telnet accept loop ended abnormally");
            }
            info!(local_addr = %running.local_addr, "telnet server closed");
            Ok(())
        })
    }
}

async fn accept_loop(listener: TcpListener, handler: TermHandler, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        warn!(%peer, %err, "failed to set TCP_NODELAY");
                    }
                    let (term, io) = Term::pair("telnet");
                    info!(%peer, term_id = %term.handle.id(), "telnet connection accepted");
                    handler(term);
                    tokio::spawn(
                        async move {
                            let (reader, writer) = stream.into_split();
                            pump(reader, writer, io).await;
                        }
                        .instrument(info_span!("telnet_conn", %peer)),
                    );
                }
                Err(err) => warn!(%err, "telnet accept failed"),
            },
        }
    }
}
