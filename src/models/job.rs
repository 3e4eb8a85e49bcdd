//! Job identity and status types shared by the engine and its transports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique, process-wide job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Built but not yet scheduled.
    Created,
    /// Executing in the foreground or background.
    Running,
    /// Suspended; resumable into either foreground or background.
    Stopped,
    /// Finished, killed, or torn down. Terminal.
    Terminated,
}

impl JobStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }

    /// Capitalized label used in `jobs` output.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Terminated => "Terminated",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Point-in-time description of a job, suitable for listings and JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JobInfo {
    /// Job identifier.
    pub id: JobId,
    /// Owning session.
    pub session_id: String,
    /// Literal command line, without a trailing `&`.
    pub line: String,
    /// Current status.
    pub status: JobStatus,
    /// Whether the job was started with `&`.
    pub background: bool,
    /// Whether the job currently owns its terminal.
    pub foreground: bool,
    /// Redirect cache file, when output goes to the internal cache.
    pub cache_location: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
