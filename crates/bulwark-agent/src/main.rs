//! bulwark-agent: unprivileged front-end for bulwark-rootd

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bulwark_agent::config::DEFAULT_CONFIG_PATH;
use bulwark_agent::{push, AgentConfig, AgentSession, Bridge, HttpJobServer, Mode, PullAgent};
use bulwark_core::Request;

#[derive(Parser, Debug)]
#[command(name = "bulwark-agent")]
#[command(about = "Bridges a management server to bulwark-rootd", version)]
struct Args {
    /// Path to the agent configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the mode from the configuration file
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_session(path: &Path, mode: Option<Mode>) -> Result<(AgentConfig, AgentSession)> {
    let mut config = AgentConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    if let Some(mode) = mode {
        config.mode = mode;
    }
    let session = config.session()?;
    Ok((config, session))
}

/// Fail early if the daemon is down, and record what host we serve
async fn self_check(bridge: &Bridge) -> Result<()> {
    bridge
        .request(&Request::ping())
        .await
        .context("bulwark-rootd is not reachable")?;

    match bridge.request(&Request::system_info()).await?.into_result() {
        Ok(info) => info!("Connected to bulwark-rootd on {}", host_summary(&info)),
        Err(e) => warn!("Connected to bulwark-rootd, system info unavailable: {}", e),
    }
    Ok(())
}

/// `host (distribution, kernel release)` from a system-info response
fn host_summary(info: &Value) -> String {
    let os = info["distribution"]["pretty_name"]
        .as_str()
        .or_else(|| info["os"]["system"].as_str())
        .unwrap_or("?");
    format!(
        "{} ({}, kernel {})",
        info["hostname"].as_str().unwrap_or("?"),
        os,
        info["kernel"].as_str().unwrap_or("?"),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "bulwark_agent=debug,bulwark_daemon=debug,tower_http=debug"
    } else {
        "bulwark_agent=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if nix::unistd::geteuid().is_root() {
        anyhow::bail!("bulwark-agent must not run as root; use an unprivileged account in the socket group");
    }

    info!("Starting bulwark-agent v{}", env!("CARGO_PKG_VERSION"));

    let (config, session) = load_session(&args.config, args.mode)?;
    info!("Mode: {}, daemon socket: {:?}", session.mode(), config.socket_path);

    let bridge = Bridge::connect(&config.socket_path);
    self_check(&bridge).await?;

    let (session_tx, session_rx) = watch::channel(session.clone());
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let config_path = args.config.clone();
    let mode_override = args.mode;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading {:?}", config_path);
                    match load_session(&config_path, mode_override) {
                        Ok((_, reloaded)) => {
                            if reloaded.mode() != session_tx.borrow().mode() {
                                warn!("Mode change to {} takes effect after restart", reloaded.mode());
                            }
                            session_tx.send_replace(reloaded);
                        }
                        Err(e) => error!("Reload failed, keeping current configuration: {:#}", e),
                    }
                }
                _ = sigterm.recv() => { info!("Received SIGTERM"); break; }
                _ = sigint.recv() => { info!("Received SIGINT"); break; }
            }
        }
        let _ = stop_tx.send(true);
    });

    match session {
        AgentSession::Pull(settings) => {
            PullAgent::new(bridge, HttpJobServer::new()?, settings, session_rx)
                .run(stop_rx)
                .await?;
        }
        AgentSession::Push(settings) => {
            let mut stop = stop_rx;
            let shutdown = async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            };
            push::serve(bridge, settings, session_rx, shutdown).await?;
        }
        AgentSession::Ssh => {
            info!("SSH mode: commands arrive as `bulwark` invocations, nothing to serve");
        }
    }

    info!("bulwark-agent stopped");
    Ok(())
}
