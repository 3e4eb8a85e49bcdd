//! Error types shared across the engine.

use std::fmt::{Display, Formatter};

/// Shared engine result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Engine error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// The leading token of a line does not name a registered command.
    CommandNotFound(String),
    /// The token sequence cannot be turned into a pipeline.
    MalformedPipeline(String),
    /// Too many jobs already redirect their output to the internal cache.
    TooManyCachedRedirects(usize),
    /// A job-control transition was attempted from the wrong state.
    InvalidJobState {
        /// Job the transition was attempted on.
        job: u64,
        /// Name of the attempted transition (`run`, `resume`, ...).
        transition: &'static str,
        /// Status the job was in at the time.
        status: String,
    },
    /// The server bootstrap is already bound.
    AlreadyBound,
    /// A transport listener failed to start.
    TransportBind(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or socket I/O failure.
    Io(String),
    /// Requested entity does not exist.
    NotFound(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommandNotFound(name) => write!(f, "{name}: command not found"),
            Self::MalformedPipeline(msg) => write!(f, "malformed pipeline: {msg}"),
            Self::TooManyCachedRedirects(limit) => write!(
                f,
                "too many cached redirects: at most {limit} jobs may save output to the cache"
            ),
            Self::InvalidJobState {
                job,
                transition,
                status,
            } => write!(f, "job {job}: cannot {transition} while {status}"),
            Self::AlreadyBound => write!(f, "already bound"),
            Self::TransportBind(msg) => write!(f, "transport bind: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
