//! Supervisor subsystem
//! The root component wires the state manager, health monitor, process
//! manager, and command dispatcher over the injected bus/store/sampler ports,
//! runs the maintenance tick loop, and owns shutdown.

pub mod dispatcher;
pub mod handle;
pub mod handlers;
pub mod health;
pub mod manager;
pub mod state;

pub use dispatcher::CommandDispatcher;
pub use handle::{HandleSnapshot, ProcessHandle};
pub use handlers::{register_core_handlers, CommandHandler};
pub use health::{HealthConfig, HealthMonitor};
pub use manager::{ManagerConfig, ProcessManager, ProcessSnapshot};
pub use state::{PersistedProcess, StateManager};

use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SupervisorConfig;
use crate::domain::ports::{Bus, ResourceSampler, RestartController, StateStore};
use crate::domain::Result;

/// The infrastructure capabilities handed to the supervisor; tests inject
/// their own fakes here instead of reaching for globals.
pub struct ServiceContext {
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn StateStore>,
    pub sampler: Arc<dyn ResourceSampler>,
    pub config: SupervisorConfig,
}

/// Daemon root: owns the components, the tick loop, and shutdown
pub struct Supervisor {
    bus: Arc<dyn Bus>,
    config: SupervisorConfig,
    state: Arc<StateManager>,
    health: Arc<HealthMonitor>,
    manager: Arc<ProcessManager>,
    dispatcher: Arc<CommandDispatcher>,
    token: CancellationToken,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    /// Wire the component graph. Dependency order is strictly one-way
    /// (supervisor → manager → health → handle); the health monitor reaches
    /// back through the RestartController callback only.
    pub fn new(ctx: ServiceContext) -> Self {
        let token = CancellationToken::new();
        let state = Arc::new(StateManager::new(ctx.store));

        let health = Arc::new(HealthMonitor::new(
            state.clone(),
            ctx.bus.clone(),
            ctx.sampler,
            ctx.config.health_config(),
        ));

        let manager = Arc::new(ProcessManager::new(
            state.clone(),
            health.clone(),
            ctx.bus.clone(),
            ctx.config.manager_config(),
            token.child_token(),
        ));

        let controller: Weak<dyn RestartController> =
            Arc::downgrade(&(manager.clone() as Arc<dyn RestartController>));
        health.set_restart_controller(controller);

        let dispatcher = Arc::new(CommandDispatcher::new(
            ctx.bus.clone(),
            ctx.config.command_topic.clone(),
        ));
        register_core_handlers(&dispatcher, manager.clone());

        Self {
            bus: ctx.bus,
            config: ctx.config,
            state,
            health,
            manager,
            dispatcher,
            token,
            tasks: StdMutex::new(Vec::new()),
        }
    }

    pub fn manager(&self) -> Arc<ProcessManager> {
        self.manager.clone()
    }

    pub fn state(&self) -> Arc<StateManager> {
        self.state.clone()
    }

    pub fn health(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    pub fn bus(&self) -> Arc<dyn Bus> {
        self.bus.clone()
    }

    /// Initialize storage and the registry, then spawn the dispatcher, the
    /// health loop, and the maintenance tick. A storage failure here aborts
    /// daemon startup.
    pub async fn start(&self) -> Result<()> {
        self.state.initialize().await?;
        self.manager.initialize().await?;
        self.dispatcher.start(self.token.child_token()).await?;

        let health = self.health.clone();
        let health_token = self.token.child_token();
        let health_task = tokio::spawn(async move {
            health.run(health_token).await;
        });

        let manager = self.manager.clone();
        let tick_token = self.token.child_token();
        let tick_interval = self.config.tick_interval();
        let fatal_after = self.config.max_restart_attempts;
        let root_token = self.token.clone();
        let tick_task = tokio::spawn(async move {
            run_tick_loop(manager, tick_interval, fatal_after, tick_token, root_token).await;
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(health_task);
        tasks.push(tick_task);

        info!(
            tick_secs = self.config.tick_interval().as_secs(),
            "Supervisor started"
        );
        Ok(())
    }

    /// True until shutdown has been requested
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Resolves when the supervisor has been asked to shut down
    pub async fn wait_for_shutdown_request(&self) {
        self.token.cancelled().await;
    }

    /// Cancel every component token, drain the dispatcher, stop all children,
    /// and abandon anything still running after the shutdown timeout.
    pub async fn shutdown(&self) {
        info!("Supervisor shutting down");
        self.token.cancel();

        let timeout = self.config.shutdown_timeout();
        self.dispatcher.stop(timeout).await;
        self.manager.dispose().await;

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!("Component task did not stop within the shutdown timeout");
            }
        }
        info!("Supervisor stopped");
    }
}

/// The periodic maintenance loop. Tick errors are logged and retried; only a
/// persistent run of consecutive failures terminates the daemon.
async fn run_tick_loop(
    manager: Arc<ProcessManager>,
    interval: Duration,
    fatal_after: u32,
    token: CancellationToken,
    root_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut consecutive_failures: u32 = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match manager.maintenance_tick().await {
            Ok(()) => consecutive_failures = 0,
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    error = %e,
                    consecutive_failures = consecutive_failures,
                    "Maintenance tick failed"
                );
                if consecutive_failures > fatal_after {
                    error!("Maintenance tick failing persistently, terminating daemon");
                    root_token.cancel();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{InMemoryBus, SqliteStore, SysinfoSampler};

    fn test_config() -> SupervisorConfig {
        let mut config = SupervisorConfig::default();
        config.tick_interval_secs = 1;
        config.shutdown_timeout_secs = 5;
        config
    }

    fn supervisor() -> Supervisor {
        Supervisor::new(ServiceContext {
            bus: Arc::new(InMemoryBus::new()),
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
            sampler: Arc::new(SysinfoSampler::new()),
            config: test_config(),
        })
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let supervisor = supervisor();
        supervisor.start().await.unwrap();
        assert!(supervisor.is_running());

        supervisor.shutdown().await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_enough_for_reinit() {
        let supervisor = supervisor();
        supervisor.start().await.unwrap();
        // Second initialize of the underlying components must not fail
        supervisor.state().initialize().await.unwrap();
        supervisor.manager().initialize().await.unwrap();
        supervisor.shutdown().await;
    }
}
