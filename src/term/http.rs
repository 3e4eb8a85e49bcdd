//! HTTP transport.
//!
//! Each `POST /api/sessions` opens a terminal; later requests feed it input
//! and collect the output produced until the shell prompts again, the
//! terminal closes, or the request timeout elapses.
//!
//! | Method   | Path                             | Effect                          |
//! |----------|----------------------------------|---------------------------------|
//! | `GET`    | `/health`                        | liveness check                  |
//! | `POST`   | `/api/sessions`                  | open a terminal                 |
//! | `POST`   | `/api/sessions/{id}/exec`        | send `{"line": ...}`            |
//! | `POST`   | `/api/sessions/{id}/interrupt`   | Ctrl-C                          |
//! | `POST`   | `/api/sessions/{id}/suspend`     | Ctrl-Z                          |
//! | `GET`    | `/api/sessions/{id}/output`      | drain output without waiting    |
//! | `DELETE` | `/api/sessions/{id}`             | close the terminal              |
//! | `GET`    | `/api/jobs`                      | list every tracked job          |

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::{Term, TermEvent, TermHandler, TermOutput, TermServer};
use crate::models::job::JobInfo;
use crate::shell::controller::JobController;
use crate::{AppError, Result};

/// Request body for `exec`.
#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    /// Input line, without terminator.
    pub line: String,
}

/// Output collected for one request.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TermResponse {
    /// Terminal identifier.
    pub session_id: String,
    /// Text written since the previous request.
    pub output: String,
    /// The terminal has been closed.
    pub closed: bool,
    /// The shell had not prompted again when the response was produced.
    pub pending: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, err: &AppError) -> Response {
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

struct Connection {
    events: mpsc::Sender<TermEvent>,
    output: AsyncMutex<mpsc::UnboundedReceiver<TermOutput>>,
    closed: CancellationToken,
}

struct HttpState {
    handler: TermHandler,
    controller: Arc<JobController>,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    request_timeout: Duration,
}

impl HttpState {
    fn connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn forget(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Collect output until the next prompt, close, or timeout.
    async fn collect(&self, id: &str, conn: &Connection) -> TermResponse {
        let deadline = Instant::now() + self.request_timeout;
        let mut rx = conn.output.lock().await;
        let mut output = String::new();
        let (closed, pending) = loop {
            tokio::select! {
                biased;

                next = tokio::time::timeout_at(deadline, rx.recv()) => match next {
                    Err(_) => break (false, true),
                    Ok(Some(TermOutput::Text(text))) => output.push_str(&text),
                    Ok(Some(TermOutput::Prompt(_))) => break (false, false),
                    Ok(Some(TermOutput::Close) | None) => break (true, false),
                },

                () = conn.closed.cancelled() => break (true, false),
            }
        };
        drop(rx);
        if closed {
            self.forget(id);
        }
        TermResponse {
            session_id: id.to_owned(),
            output,
            closed,
            pending,
        }
    }

    /// Take whatever output is already queued.
    async fn drain(&self, id: &str, conn: &Connection) -> TermResponse {
        let mut rx = conn.output.lock().await;
        let mut output = String::new();
        let mut pending = true;
        let closed = loop {
            match rx.try_recv() {
                Ok(TermOutput::Text(text)) => output.push_str(&text),
                Ok(TermOutput::Prompt(_)) => pending = false,
                Ok(TermOutput::Close) | Err(TryRecvError::Disconnected) => break true,
                Err(TryRecvError::Empty) => break false,
            }
        };
        drop(rx);
        if closed {
            self.forget(id);
        }
        TermResponse {
            session_id: id.to_owned(),
            output,
            closed,
            pending: pending && !closed,
        }
    }

    async fn send(&self, id: &str, event: TermEvent) -> Response {
        let Some(conn) = self.connection(id) else {
            return error_response(
                StatusCode::NOT_FOUND,
                &AppError::NotFound(format!("session {id}")),
            );
        };
        if conn.events.send(event).await.is_err() {
            self.forget(id);
            return Json(TermResponse {
                session_id: id.to_owned(),
                output: String::new(),
                closed: true,
                pending: false,
            })
            .into_response();
        }
        Json(self.collect(id, &conn).await).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn open_session(State(state): State<Arc<HttpState>>) -> Response {
    let (term, io) = Term::pair("http");
    let id = term.handle.id().to_owned();
    let conn = Arc::new(Connection {
        events: io.events,
        output: AsyncMutex::new(io.output),
        closed: io.closed,
    });
    state
        .connections
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id.clone(), Arc::clone(&conn));
    info!(term_id = %id, "http terminal opened");
    (state.handler)(term);

    let response = state.collect(&id, &conn).await;
    (StatusCode::CREATED, Json(response)).into_response()
}

async fn exec(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(request): Json<ExecRequest>,
) -> Response {
    state.send(&id, TermEvent::Line(request.line)).await
}

async fn interrupt(State(state): State<Arc<HttpState>>, Path(id): Path<String>) -> Response {
    state.send(&id, TermEvent::Interrupt).await
}

async fn suspend(State(state): State<Arc<HttpState>>, Path(id): Path<String>) -> Response {
    state.send(&id, TermEvent::Suspend).await
}

async fn output(State(state): State<Arc<HttpState>>, Path(id): Path<String>) -> Response {
    let Some(conn) = state.connection(&id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            &AppError::NotFound(format!("session {id}")),
        );
    };
    Json(state.drain(&id, &conn).await).into_response()
}

async fn close_session(State(state): State<Arc<HttpState>>, Path(id): Path<String>) -> Response {
    let Some(conn) = state.forget(&id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            &AppError::NotFound(format!("session {id}")),
        );
    };
    let _ = conn.events.try_send(TermEvent::Eof);
    conn.closed.cancel();
    info!(term_id = %id, "http terminal closed by client");
    StatusCode::NO_CONTENT.into_response()
}

async fn list_jobs(State(state): State<Arc<HttpState>>) -> Json<Vec<JobInfo>> {
    Json(state.controller.job_infos())
}

/// Build the router for `state`.
fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(open_session))
        .route("/api/sessions/{id}", delete(close_session))
        .route("/api/sessions/{id}/exec", post(exec))
        .route("/api/sessions/{id}/interrupt", post(interrupt))
        .route("/api/sessions/{id}/suspend", post(suspend))
        .route("/api/sessions/{id}/output", get(output))
        .route("/api/jobs", get(list_jobs))
        .with_state(state)
}

struct Running {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// HTTP term server.
pub struct HttpTermServer {
    ip: String,
    port: u16,
    connection_timeout: Duration,
    request_timeout: Duration,
    controller: Arc<JobController>,
    running: Option<Running>,
}

impl HttpTermServer {
    /// Server that will bind `ip:port` and list jobs from `controller`.
    #[must_use]
    pub fn new(
        ip: impl Into<String>,
        port: u16,
        connection_timeout: Duration,
        request_timeout: Duration,
        controller: Arc<JobController>,
    ) -> Self {
        Self {
            ip: ip.into(),
            port,
            connection_timeout,
            request_timeout,
            controller,
            running: None,
        }
    }

    /// Bound address while listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }
}

impl TermServer for HttpTermServer {
    fn name(&self) -> &'static str {
        "http"
    }

    fn listen(
        &mut self,
        handler: TermHandler,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            if self.running.is_some() {
                return Err(AppError::TransportBind("http: already listening".into()));
            }

            let addr = format!("{}:{}", self.ip, self.port);
            let listener = tokio::time::timeout(self.connection_timeout, TcpListener::bind(&addr))
                .await
                .map_err(|_| AppError::TransportBind(format!("http: bind to {addr} timed out")))?
                .map_err(|err| {
                    AppError::TransportBind(format!("http: failed to bind {addr}: {err}"))
                })?;
            let local_addr = listener.local_addr()?;

            let state = Arc::new(HttpState {
                handler,
                controller: Arc::clone(&self.controller),
                connections: Mutex::new(HashMap::new()),
                request_timeout: self.request_timeout,
            });
            let app = router(Arc::clone(&state));

            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let task = tokio::spawn(
                async move {
                    let shutdown = async move {
                        token.cancelled().await;
                        // Release requests still waiting on terminal output.
                        let open: Vec<Arc<Connection>> = state
                            .connections
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .drain()
                            .map(|(_, conn)| conn)
                            .collect();
                        for conn in open {
                            conn.closed.cancel();
                        }
                    };
                    if let Err(err) = axum::serve(listener, app)
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        warn!(%err, "http server error");
                    }
                }
                .instrument(info_span!("http_server", %local_addr)),
            );
            info!(%local_addr, "http server listening");

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
                return Err(AppError::TransportBind("http: server not started".into()));
            };
            running.cancel.cancel();
            if let Err(err) = running.task.await {
                warn!(%err, "http server task ended abnormally");
            }
            info!(local_addr = %running.local_addr, "http server closed");
            Ok(())
        })
    }
}
