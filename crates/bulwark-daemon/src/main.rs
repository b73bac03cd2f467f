//! Bulwark root daemon - Main entry point
//!
//! Owns the capability modules and serves requests from unprivileged
//! front-ends over a group-restricted Unix socket.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bulwark_daemon::config::DEFAULT_CONFIG_PATH;
use bulwark_daemon::{load_builtin, DaemonConfig, DaemonError, IpcServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bulwark_daemon=info,bulwark_rootd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting bulwark-rootd v{}", env!("CARGO_PKG_VERSION"));

    // Load or create config
    let config_path = std::env::var("BULWARK_ROOTD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let (config, created) = DaemonConfig::load_or_create(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    }

    if config.dev_mode {
        warn!("dev_mode enabled: root check skipped");
    } else if !nix::unistd::geteuid().is_root() {
        return Err(DaemonError::NotRoot.into());
    }

    config.ensure_directories()?;

    let registry = Arc::new(load_builtin(&config).await);
    let server = IpcServer::bind(&config, registry)?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    };

    info!("Daemon started successfully");
    server.run(shutdown).await?;
    info!("Daemon shut down");

    Ok(())
}
