//! Job-control core: tokens, pipelines, jobs, sessions and the shell loop.

pub mod command;
pub mod controller;
pub mod dispatch;
pub mod filter;
pub mod future;
pub mod handler;
pub mod job;
pub mod process;
pub mod repl;
pub mod session;
pub mod token;
