#![forbid(unsafe_code)]

//! `jobterm` server binary.
//!
//! Loads configuration, binds the enabled transports through the global
//! bootstrap, and tears everything down on Ctrl-C or SIGTERM.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use jobterm::{AppError, Bootstrap, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "jobterm", about = "Multi-session job-control shell server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the listen address.
    #[arg(long)]
    ip: Option<String>,

    /// Override the telnet port; zero or negative disables telnet.
    #[arg(long, allow_hyphen_values = true)]
    telnet_port: Option<i32>,

    /// Override the HTTP port; zero or negative disables HTTP.
    #[arg(long, allow_hyphen_values = true)]
    http_port: Option<i32>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("jobterm server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(ip) = args.ip {
        config.ip = ip;
    }
    if let Some(port) = args.telnet_port {
        config.telnet_port = port;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    config.validate()?;

    let bootstrap = Bootstrap::global();
    let endpoints = bootstrap.bind(&config, Vec::new()).await.map_err(|err| {
        error!(%err, "failed to bind");
        err
    })?;
    for endpoint in &endpoints {
        info!(transport = endpoint.transport, address = %endpoint.address, "accepting connections");
    }

    shutdown_signal().await;
    info!("shutdown signal received");
    bootstrap.destroy().await;
    info!("jobterm stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
