//! SneakVLC rendezvous server
//!
//! HTTP/WebSocket registry where peers publish how to reach them.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (0.0.0.0:8080, 10 entries)
//! sneakvlc
//!
//! # Custom port and table size
//! sneakvlc --port 9000 --max-entries 50
//!
//! # Explicit config file
//! sneakvlc --config /etc/sneakvlc/config.toml
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sneak_core::Config;
use sneak_signal::{Registry, SignalServer};

#[derive(Parser, Debug)]
#[command(name = "sneakvlc")]
#[command(about = "Rendezvous registry for peer-to-peer connection setup")]
#[command(version)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "SNEAKVLC_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long, alias = "host")]
    bind: Option<IpAddr>,

    /// Maximum number of entries kept at once
    #[arg(long)]
    max_entries: Option<usize>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(max_entries) = args.max_entries {
        config.registry.max_entries = max_entries;
    }
    config.registry.validate()?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    if args.init_config {
        match &args.config {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }
        return Ok(());
    }

    let addr = config.server.socket_addr();
    info!("Starting SneakVLC server on {}", addr);
    info!(
        "Registry: {} entries max, sweep every {}s, stale after {}s",
        config.registry.max_entries,
        config.registry.sweep_interval_secs,
        config.registry.stale_timeout_secs
    );

    let registry = Arc::new(Registry::new(config.registry.clone()));
    let server = SignalServer::new(registry);

    let listener = TcpListener::bind(addr).await?;
    server.serve_listener(listener, shutdown_signal()).await?;

    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
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
