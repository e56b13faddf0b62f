//! warden
//!
//! Bus client for the warden daemon. Remote bus transports are provided by
//! the deployment; without one this binary runs an embedded supervisor over
//! the in-process bus against the configured state store, which makes
//! one-shot commands (`run`, `register`, `status`, `ping`) work standalone.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use warden_cli::{execute, BusClient, Cli};
use warden_engine::infrastructure::{InMemoryBus, SqliteStore, SysinfoSampler};
use warden_engine::{ServiceContext, Supervisor, SupervisorConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match std::env::var("WARDEN_CONFIG") {
        Ok(path) => match SupervisorConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        Err(_) => SupervisorConfig::from_env(),
    };

    let store = {
        let path = config.database_path();
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("error: cannot create {}: {}", parent.display(), e);
                return ExitCode::FAILURE;
            }
        }
        match SqliteStore::open(&path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    };

    let bus = Arc::new(InMemoryBus::new());
    let supervisor = Supervisor::new(ServiceContext {
        bus: bus.clone(),
        store,
        sampler: Arc::new(SysinfoSampler::new()),
        config,
    });
    if let Err(e) = supervisor.start().await {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    let client = BusClient::new(bus, Duration::from_secs(cli.timeout));
    let code = execute(&client, &cli.command).await;

    supervisor.shutdown().await;
    if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
