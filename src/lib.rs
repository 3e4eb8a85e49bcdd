#![forbid(unsafe_code)]

//! Multi-session command execution engine with shell-style job control.
//!
//! Clients connect over telnet, HTTP or a local socket; each connection gets
//! a shell that parses lines into jobs, runs them in the foreground or
//! background, and supports `jobs`, `fg`, `bg` and `kill`.

pub mod commands;
pub mod config;
pub mod errors;
pub mod models;
pub mod server;
pub mod shell;
pub mod term;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use server::{Bootstrap, Endpoint, ShellServer};
