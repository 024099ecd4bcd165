//! MultiRig daemon.
//!
//! Composition root for the control plane: loads the configuration, builds
//! the rig registry, starts the sync engine, status broadcaster and the
//! rigctl listener, then runs until interrupted. On Unix, SIGHUP reloads
//! the configuration file and applies it atomically; the listener is
//! restarted only when its bind address changed.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use multirig_core::types::AppConfig;
use multirig_engine::{RigRegistry, StatusBroadcaster, SyncEngine};
use multirig_listener::RigctlListener;

/// MultiRig -- present several Hamlib-controlled transceivers as one rig.
#[derive(Parser)]
#[command(name = "multirig-daemon", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "multirig.toml")]
    config: PathBuf,

    /// Override the rigctl listener bind host.
    #[arg(long)]
    listen_host: Option<String>,

    /// Override the rigctl listener bind port.
    #[arg(long)]
    listen_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;
    if let Some(host) = cli.listen_host.clone() {
        cfg.rigctl_listen_host = host;
    }
    if let Some(port) = cli.listen_port {
        cfg.rigctl_listen_port = port;
    }

    let registry = RigRegistry::new();
    registry
        .apply_config(cfg.clone())
        .await
        .context("applying initial configuration")?;

    let sync_engine = SyncEngine::spawn(registry.clone());
    let broadcaster = StatusBroadcaster::spawn(registry.clone());
    let mut listener = RigctlListener::bind(
        &cfg.rigctl_listen_host,
        cfg.rigctl_listen_port,
        registry.clone(),
    )
    .await
    .context("binding rigctl listener")?;

    info!(
        rigs = cfg.rigs.len(),
        listen = %listener.local_addr(),
        "multirig-daemon running"
    );

    run_until_shutdown(&cli, &registry, &mut listener, &mut cfg).await?;

    info!("shutting down");
    listener.shutdown().await;
    sync_engine.shutdown().await;
    broadcaster.shutdown().await;
    registry.shutdown().await;
    Ok(())
}

/// Wait for ctrl-c, servicing SIGHUP config reloads in the meantime.
#[cfg(unix)]
async fn run_until_shutdown(
    cli: &Cli,
    registry: &Arc<RigRegistry>,
    listener: &mut RigctlListener,
    active: &mut AppConfig,
) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for ctrl-c")?;
                return Ok(());
            }
            _ = hangup.recv() => {
                info!(path = %cli.config.display(), "SIGHUP: reloading configuration");
                match config::load_config(&cli.config) {
                    Ok(cfg) => {
                        if let Err(e) = apply_configuration(cli, registry, listener, active, cfg).await {
                            error!(error = %e, "reconfiguration failed");
                        }
                    }
                    Err(e) => error!(error = %e, "configuration reload failed"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn run_until_shutdown(
    _cli: &Cli,
    _registry: &Arc<RigRegistry>,
    _listener: &mut RigctlListener,
    _active: &mut AppConfig,
) -> Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    Ok(())
}

/// Apply a new configuration at runtime: the registry swaps its client set
/// atomically, and the listener is restarted only if its bind address
/// changed. The accepted configuration is persisted back to disk.
#[cfg(unix)]
async fn apply_configuration(
    cli: &Cli,
    registry: &Arc<RigRegistry>,
    listener: &mut RigctlListener,
    active: &mut AppConfig,
    mut cfg: AppConfig,
) -> Result<()> {
    if let Some(host) = cli.listen_host.clone() {
        cfg.rigctl_listen_host = host;
    }
    if let Some(port) = cli.listen_port {
        cfg.rigctl_listen_port = port;
    }

    registry
        .apply_config(cfg.clone())
        .await
        .context("applying configuration")?;
    config::save_config(&cfg, &cli.config)?;

    if cfg.listen_addr() != active.listen_addr() {
        info!(addr = %cfg.listen_addr(), "listener address changed, restarting");
        listener.shutdown().await;
        *listener = RigctlListener::bind(
            &cfg.rigctl_listen_host,
            cfg.rigctl_listen_port,
            registry.clone(),
        )
        .await
        .context("rebinding rigctl listener")?;
    }

    *active = cfg;
    info!(rigs = active.rigs.len(), "configuration applied");
    Ok(())
}
