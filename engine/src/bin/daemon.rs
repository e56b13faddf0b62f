//! warden daemon
//!
//! Runs the supervisor with the in-process bus and a sqlite state store.
//! Configuration comes from an optional YAML file (`WARDEN_CONFIG`) plus the
//! install-root / environment variables; there are no CLI arguments.

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use warden_engine::infrastructure::{InMemoryBus, SqliteStore, SysinfoSampler};
use warden_engine::{ServiceContext, Supervisor, SupervisorConfig};

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> &'static str {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    "Ctrl+C"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_env("WARDEN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match std::env::var("WARDEN_CONFIG") {
        Ok(path) => SupervisorConfig::load(&path)?,
        Err(_) => SupervisorConfig::from_env(),
    };
    config.validate()?;

    info!(
        environment = %config.environment,
        install_root = %config.install_root.display(),
        "Starting warden daemon"
    );

    let store: Arc<dyn warden_engine::domain::ports::StateStore> =
        match config.database.kind.as_str() {
            "memory" => {
                warn!("Using in-memory state store; state will not survive restarts");
                Arc::new(SqliteStore::open_in_memory()?)
            }
            _ => {
                let path = config.database_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                info!(path = %path.display(), "Opening state store");
                Arc::new(SqliteStore::open(&path)?)
            }
        };

    let supervisor = Supervisor::new(ServiceContext {
        bus: Arc::new(InMemoryBus::new()),
        store,
        sampler: Arc::new(SysinfoSampler::new()),
        config,
    });

    if let Err(e) = supervisor.start().await {
        error!(error = %e, "Supervisor failed to start");
        return Err(e.into());
    }

    tokio::select! {
        signal = wait_for_shutdown_signal() => {
            info!(signal = signal, "Shutdown signal received");
        }
        _ = supervisor.wait_for_shutdown_request() => {
            warn!("Supervisor requested shutdown");
        }
    }

    supervisor.shutdown().await;
    info!("Daemon exited");
    Ok(())
}
