//! webmpcd - serves the webmpc browser UI and bridges it to MPD.
//!
//! Static files are served from the root directory; `/ws` is the bridge
//! endpoint every browser session connects to. One connection to the daemon
//! is shared by all sessions.

mod config;
mod listen;

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tower_http::services::ServeDir;
use webmpc_core::{Bridge, LogEvent, LogLevel};

use crate::config::ServerConfig;
use crate::listen::ListenTarget;

/// webmpcd - Web interface for the Music Player Daemon.
#[derive(Parser, Debug)]
#[command(name = "webmpcd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "WEBMPC_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Address or Unix socket path to listen on (overrides config file).
    #[arg(long, env = "WEBMPC_LISTEN")]
    listen: Option<String>,

    /// HTTP root directory (overrides config file).
    #[arg(long, env = "WEBMPC_ROOT")]
    root: Option<PathBuf>,

    /// Address of the MPD server (overrides config file).
    #[arg(long, env = "WEBMPC_ADDR")]
    addr: Option<String>,

    /// MPD password (overrides config file).
    #[arg(long, env = "WEBMPC_PASSWD", hide_env_values = true)]
    passwd: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("webmpcd v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(root) = args.root {
        config.root = root;
    }
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if let Some(passwd) = args.passwd {
        config.passwd = Some(passwd);
    }

    let target = ListenTarget::parse(&config.listen)?;
    log::info!(
        "Configuration: listen={}, root={}, mpd={}",
        config.listen,
        config.root.display(),
        config.addr
    );

    let bridge = Bridge::start(config.to_bridge_config())
        .await
        .context("Failed to start the MPD bridge")?;
    forward_diagnostics(&bridge);

    let app = bridge
        .router()
        .fallback_service(ServeDir::new(&config.root));

    // Shut the bridge down first: open WebSocket sessions keep the HTTP
    // server from draining until they are closed.
    let shutdown = {
        let bridge = bridge.clone();
        async move {
            shutdown_signal().await;
            log::info!("Shutdown signal received, cleaning up...");
            bridge.shutdown().await;
        }
    };

    serve(target, app, shutdown).await?;

    bridge.shutdown().await;
    log::info!("Shutdown complete");
    Ok(())
}

async fn serve<F>(target: ListenTarget, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    match target {
        ListenTarget::Tcp(addr) => {
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to listen on {}", addr))?;
            log::info!("Listening on: {}", addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
                .context("HTTP server failed")
        }
        #[cfg(unix)]
        ListenTarget::Unix(path) => {
            remove_stale_socket(&path)?;
            let listener = tokio::net::UnixListener::bind(&path)
                .with_context(|| format!("Failed to listen on {}", path.display()))?;
            log::info!("Listening on: {}", path.display());
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
                .context("HTTP server failed");
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Could not remove socket {}: {}", path.display(), e);
            }
            result
        }
        #[cfg(not(unix))]
        ListenTarget::Unix(path) => {
            anyhow::bail!("Unix sockets are not supported here: {}", path.display())
        }
    }
}

/// Removes a socket file left behind by a previous run.
#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket {}", path.display())),
        Ok(_) => anyhow::bail!("{} exists and is not a socket", path.display()),
        Err(_) => Ok(()),
    }
}

/// Copies the bridge's diagnostic stream into the process log.
fn forward_diagnostics(bridge: &Bridge) {
    let (backlog, mut live) = bridge.subscribe_logs();
    tokio::spawn(async move {
        for event in &backlog {
            emit(event);
        }
        loop {
            match live.recv().await {
                Ok(event) => emit(&event),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Dropped {} diagnostic event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn emit(event: &LogEvent) {
    log::log!(target: "webmpc", process_level(event.level), "{}", event.message);
}

fn process_level(level: LogLevel) -> log::Level {
    match level {
        LogLevel::Debug => log::Level::Debug,
        LogLevel::Info => log::Level::Info,
        LogLevel::Warn => log::Level::Warn,
        LogLevel::Error => log::Level::Error,
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
