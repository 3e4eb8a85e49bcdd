//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

fn default_ip() -> String {
    "127.0.0.1".into()
}

fn default_telnet_port() -> i32 {
    3658
}

fn default_http_port() -> i32 {
    8563
}

fn default_connection_timeout_ms() -> u64 {
    6000
}

fn default_session_timeout_seconds() -> u64 {
    1800
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_cache_root() -> PathBuf {
    std::env::temp_dir().join("jobterm-cache")
}

fn default_prompt() -> String {
    "$ ".into()
}

/// Global configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Address every transport binds to.
    #[serde(default = "default_ip")]
    pub ip: String,
    /// TCP line terminal port; non-positive skips the transport.
    #[serde(default = "default_telnet_port")]
    pub telnet_port: i32,
    /// HTTP terminal port; non-positive skips the transport.
    #[serde(default = "default_http_port")]
    pub http_port: i32,
    /// Local socket name; empty skips the transport.
    #[serde(default)]
    pub local_socket: String,
    /// Time allowed for a listener to bind.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Idle time after which a session's terminal is closed; 0 disables reaping.
    #[serde(default = "default_session_timeout_seconds")]
    pub session_timeout_seconds: u64,
    /// Longest an HTTP exec request waits for the next prompt.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Longest shutdown waits for job tasks to wind down.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Directory holding default redirect targets.
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,
    /// Mirror every terminal-bound job output into the result cache.
    #[serde(default)]
    pub save_result: bool,
    /// Prompt written before each read.
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            telnet_port: default_telnet_port(),
            http_port: default_http_port(),
            local_socket: String::new(),
            connection_timeout_ms: default_connection_timeout_ms(),
            session_timeout_seconds: default_session_timeout_seconds(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            cache_root: default_cache_root(),
            save_result: false,
            prompt: default_prompt(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Bind timeout for transport listeners.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Idle session timeout, `None` when reaping is disabled.
    #[must_use]
    pub fn session_timeout(&self) -> Option<Duration> {
        (self.session_timeout_seconds > 0).then(|| Duration::from_secs(self.session_timeout_seconds))
    }

    /// Upper bound for one HTTP exec round trip.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Upper bound for waiting on job tasks during shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Port the telnet transport binds, `None` when it is disabled.
    #[must_use]
    pub fn telnet_listen_port(&self) -> Option<u16> {
        enabled_port(self.telnet_port)
    }

    /// Port the HTTP transport binds, `None` when it is disabled.
    #[must_use]
    pub fn http_listen_port(&self) -> Option<u16> {
        enabled_port(self.http_port)
    }

    /// Validate field combinations that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.connection_timeout_ms == 0 {
            return Err(AppError::Config(
                "connection_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.prompt.is_empty() {
            return Err(AppError::Config("prompt must not be empty".into()));
        }

        if self.ip.trim().is_empty() {
            return Err(AppError::Config("ip must not be empty".into()));
        }

        for (field, port) in [("telnet_port", self.telnet_port), ("http_port", self.http_port)] {
            if port > i32::from(u16::MAX) {
                return Err(AppError::Config(format!("{field} {port} is out of range")));
            }
        }

        Ok(())
    }
}

/// A non-positive port disables its transport.
fn enabled_port(port: i32) -> Option<u16> {
    if port > 0 {
        u16::try_from(port).ok()
    } else {
        None
    }
}
