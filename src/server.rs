//! Shell server and process-wide bootstrap.
//!
//! [`ShellServer`] owns the transports, the job controller and the session
//! registry; every accepted terminal gets its own [`Shell`] task.
//! [`Bootstrap`] guards a server with a compare-and-set flag so at most one
//! is bound at a time, rolls back on a failed bind, and tears everything
//! down on [`Bootstrap::destroy`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::commands::BuiltinCommands;
use crate::config::GlobalConfig;
use crate::shell::command::{CommandRegistry, CommandResolver};
use crate::shell::controller::JobController;
use crate::shell::repl::Shell;
use crate::shell::session::SessionRegistry;
use crate::term::http::HttpTermServer;
use crate::term::local::LocalTermServer;
use crate::term::telnet::TelnetTermServer;
use crate::term::{Term, TermHandler, TermServer};
use crate::{AppError, Result};

/// A transport that is accepting connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Transport name (`telnet`, `http`, `local`).
    pub transport: &'static str,
    /// Bound address or socket name.
    pub address: String,
}

/// Accepts terminals from every transport and runs a shell on each.
pub struct ShellServer {
    controller: Arc<JobController>,
    registry: Arc<CommandRegistry>,
    sessions: Arc<SessionRegistry>,
    servers: Vec<Box<dyn TermServer>>,
    shells: TaskTracker,
    reaper: Option<(CancellationToken, JoinHandle<()>)>,
    session_timeout: Option<Duration>,
    prompt: String,
    shutdown_grace: Duration,
}

impl ShellServer {
    /// Server with no transports and no resolvers.
    #[must_use]
    pub fn new(controller: Arc<JobController>, prompt: impl Into<String>) -> Self {
        Self {
            controller,
            registry: Arc::new(CommandRegistry::new()),
            sessions: Arc::new(SessionRegistry::new()),
            servers: Vec::new(),
            shells: TaskTracker::new(),
            reaper: None,
            session_timeout: None,
            prompt: prompt.into(),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Server configured from `config`: built-in commands first, then
    /// `resolvers`, then one transport per enabled endpoint.
    #[must_use]
    pub fn from_config(config: &GlobalConfig, resolvers: Vec<Arc<dyn CommandResolver>>) -> Self {
        let controller = Arc::new(JobController::from_config(config));
        let mut server = Self::new(Arc::clone(&controller), config.prompt.clone())
            .with_session_timeout(config.session_timeout())
            .with_shutdown_grace(config.shutdown_grace());

        server.register_resolver(Arc::new(BuiltinCommands::new()));
        for resolver in resolvers {
            server.register_resolver(resolver);
        }

        if let Some(port) = config.telnet_listen_port() {
            server.add_transport(Box::new(TelnetTermServer::new(
                config.ip.clone(),
                port,
                config.connection_timeout(),
            )));
        }
        if let Some(port) = config.http_listen_port() {
            server.add_transport(Box::new(HttpTermServer::new(
                config.ip.clone(),
                port,
                config.connection_timeout(),
                config.request_timeout(),
                controller,
            )));
        }
        if !config.local_socket.is_empty() {
            server.add_transport(Box::new(LocalTermServer::new(
                config.local_socket.clone(),
                config.connection_timeout(),
            )));
        }
        server
    }

    /// Close sessions idle for longer than `timeout`; `None` disables it.
    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Upper bound for waiting on tasks in [`close`](Self::close).
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Add a command resolver after the existing ones.
    pub fn register_resolver(&self, resolver: Arc<dyn CommandResolver>) {
        self.registry.register(resolver);
    }

    /// Add a transport; it starts on [`listen`](Self::listen).
    pub fn add_transport(&mut self, server: Box<dyn TermServer>) {
        self.servers.push(server);
    }

    /// Job controller shared by every session.
    #[must_use]
    pub fn controller(&self) -> &Arc<JobController> {
        &self.controller
    }

    /// Command registry shared by every session.
    #[must_use]
    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Live sessions.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Callback that runs a shell on each accepted terminal.
    #[must_use]
    pub fn term_handler(&self) -> TermHandler {
        let controller = Arc::clone(&self.controller);
        let registry = Arc::clone(&self.registry);
        let sessions = Arc::clone(&self.sessions);
        let shells = self.shells.clone();
        let prompt = self.prompt.clone();
        Arc::new(move |term: Term| {
            let shell = Shell::new(
                term,
                Arc::clone(&controller),
                Arc::clone(&registry),
                Arc::clone(&sessions),
                prompt.clone(),
            );
            let span = info_span!("session", session_id = %shell.session().id());
            shells.spawn(shell.run().instrument(span));
        })
    }

    /// Start every transport in registration order.
    ///
    /// If one fails, the transports already started are closed again in
    /// reverse order and the failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first transport's `AppError::TransportBind` (or
    /// `AppError::Io`).
    pub async fn listen(&mut self) -> Result<Vec<Endpoint>> {
        if self.servers.is_empty() {
            warn!("no transport enabled");
        }

        let handler = self.term_handler();
        let mut endpoints = Vec::with_capacity(self.servers.len());
        for index in 0..self.servers.len() {
            let transport = self.servers[index].name();
            match self.servers[index].listen(Arc::clone(&handler)).await {
                Ok(address) => {
                    info!(transport, %address, "transport listening");
                    endpoints.push(Endpoint { transport, address });
                }
                Err(err) => {
                    error!(transport, %err, "transport failed to start, rolling back");
                    for started in self.servers[..index].iter_mut().rev() {
                        if let Err(close_err) = started.close().await {
                            warn!(transport = started.name(), %close_err, "rollback close failed");
                        }
                    }
                    return Err(err);
                }
            }
        }

        self.start_reaper();
        Ok(endpoints)
    }

    fn start_reaper(&mut self) {
        let Some(timeout) = self.session_timeout else {
            return;
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let sessions = Arc::clone(&self.sessions);
        let period = (timeout / 2).clamp(Duration::from_millis(100), Duration::from_secs(60));
        let task = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        () = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let closed = sessions.close_idle(timeout);
                            if closed > 0 {
                                info!(closed, "idle sessions closed");
                            }
                        }
                    }
                }
            }
            .instrument(info_span!("session_reaper")),
        );
        self.reaper = Some((cancel, task));
    }

    /// Stop the reaper, close every transport and terminal, terminate every
    /// job, then wait (bounded by the shutdown grace) for their tasks.
    pub async fn close(&mut self) {
        if let Some((cancel, task)) = self.reaper.take() {
            cancel.cancel();
            let _ = task.await;
        }

        for server in self.servers.iter_mut().rev() {
            if let Err(err) = server.close().await {
                debug!(transport = server.name(), %err, "transport close skipped");
            }
        }

        self.sessions.close_all();
        self.controller.close_all().await;

        self.shells.close();
        self.controller.tracker().close();
        let drained = async {
            self.shells.wait().await;
            self.controller.tracker().wait().await;
        };
        if tokio::time::timeout(self.shutdown_grace, drained).await.is_err() {
            warn!(
                grace_ms = self.shutdown_grace.as_millis(),
                "tasks still running after shutdown grace period"
            );
        }
        info!("shell server closed");
    }
}

/// Process-wide owner of at most one bound [`ShellServer`].
pub struct Bootstrap {
    bound: AtomicBool,
    server: AsyncMutex<Option<ShellServer>>,
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new()
    }
}

impl Bootstrap {
    /// Unbound bootstrap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bound: AtomicBool::new(false),
            server: AsyncMutex::new(None),
        }
    }

    /// The process-wide instance.
    #[must_use]
    pub fn global() -> &'static Bootstrap {
        static GLOBAL: OnceLock<Bootstrap> = OnceLock::new();
        GLOBAL.get_or_init(Bootstrap::new)
    }

    /// Whether a server is bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }

    /// Build a server from `config` and start its transports.
    ///
    /// # Errors
    ///
    /// - `AppError::AlreadyBound` if a server is already bound; nothing is
    ///   started.
    /// - The transport error if any listener fails; every transport started
    ///   so far is closed again and the bootstrap returns to unbound.
    pub async fn bind(
        &self,
        config: &GlobalConfig,
        resolvers: Vec<Arc<dyn CommandResolver>>,
    ) -> Result<Vec<Endpoint>> {
        // The flag only changes while the slot lock is held.
        let mut slot = self.server.lock().await;
        if self
            .bound
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::AlreadyBound);
        }

        let mut server = ShellServer::from_config(config, resolvers);
        match server.listen().await {
            Ok(endpoints) => {
                *slot = Some(server);
                info!(endpoints = endpoints.len(), "server bound");
                Ok(endpoints)
            }
            Err(err) => {
                self.bound.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Job controller of the bound server.
    pub async fn controller(&self) -> Option<Arc<JobController>> {
        self.server
            .lock()
            .await
            .as_ref()
            .map(|server| Arc::clone(server.controller()))
    }

    /// Session registry of the bound server.
    pub async fn sessions(&self) -> Option<Arc<SessionRegistry>> {
        self.server
            .lock()
            .await
            .as_ref()
            .map(|server| Arc::clone(server.sessions()))
    }

    /// Tear down the bound server, if any, and return to unbound.
    pub async fn destroy(&self) {
        let mut slot = self.server.lock().await;
        let Some(mut server) = slot.take() else {
            return;
        };
        server.close().await;
        self.bound.store(false, Ordering::SeqCst);
        info!("server destroyed");
    }
}
