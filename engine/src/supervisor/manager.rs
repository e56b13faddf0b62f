//! ProcessManager
//! Registry of supervised processes. Orchestrates start/stop/restart with
//! retry and timeout, persists every transition, consumes system events from
//! the bus, and implements the maintenance tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::START_BACKOFF_BASE;
use crate::domain::ports::{topics, Bus, BusExt, RestartController};
use crate::domain::{
    Event, EventType, ProcessDescriptor, ProcessStatus, Result, SupervisorError,
};
use crate::supervisor::handle::ProcessHandle;
use crate::supervisor::health::HealthMonitor;
use crate::supervisor::state::StateManager;

/// Manager tuning knobs, taken from the supervisor config
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_start_attempts: u32,
    pub shutdown_timeout: Duration,
    pub auto_restart_default: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_start_attempts: crate::constants::DEFAULT_MAX_START_ATTEMPTS,
            shutdown_timeout: Duration::from_secs(crate::constants::DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            auto_restart_default: true,
        }
    }
}

struct ManagedProcess {
    descriptor: ProcessDescriptor,
    handle: Arc<ProcessHandle>,
}

/// Point-in-time view of one registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub id: String,
    pub name: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<String>,
}

/// Owns the registry of supervised processes
pub struct ProcessManager {
    registry: RwLock<HashMap<String, Arc<ManagedProcess>>>,
    /// Serializes all lifecycle mutations, in request arrival order
    ops: Mutex<()>,
    state: Arc<StateManager>,
    health: Arc<HealthMonitor>,
    bus: Arc<dyn Bus>,
    config: ManagerConfig,
    token: CancellationToken,
    initialized: AtomicBool,
}

impl ProcessManager {
    pub fn new(
        state: Arc<StateManager>,
        health: Arc<HealthMonitor>,
        bus: Arc<dyn Bus>,
        config: ManagerConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            ops: Mutex::new(()),
            state,
            health,
            bus,
            config,
            token,
            initialized: AtomicBool::new(false),
        }
    }

    /// Load non-stopped descriptors from storage into the registry (without
    /// starting them) and begin consuming system events. Idempotent once it
    /// has succeeded; a storage failure here is fatal to daemon startup.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        let persisted = self.state.get_active().await?;
        {
            let _guard = self.ops.lock().await;
            for row in persisted {
                let id = row.descriptor.id.clone();
                if self.registry.read().unwrap().contains_key(&id) {
                    continue;
                }
                debug!(process_id = %id, persisted_status = %row.status, "Recovering process");
                self.install(row.descriptor).await?;
                // The child did not survive the daemon; reflect that
                self.state.update_status(&id, ProcessStatus::Stopped).await?;
            }
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.consume_events().await;
        });

        self.initialized.store(true, Ordering::SeqCst);
        let count = self.registry.read().unwrap().len();
        info!(recovered = count, "Process manager initialized");
        Ok(())
    }

    /// Create a handle, persist, register with the health monitor, and spawn
    /// the status relay. Caller holds the ops lock.
    async fn install(&self, descriptor: ProcessDescriptor) -> Result<Arc<ProcessHandle>> {
        let handle = Arc::new(ProcessHandle::new(&descriptor));

        self.state
            .save_process(&descriptor, ProcessStatus::Stopped)
            .await?;
        self.health.register(&descriptor, handle.clone());
        self.spawn_status_relay(descriptor.id.clone(), handle.clone());

        let managed = Arc::new(ManagedProcess {
            descriptor: descriptor.clone(),
            handle: handle.clone(),
        });
        self.registry
            .write()
            .unwrap()
            .insert(descriptor.id.clone(), managed);

        Ok(handle)
    }

    /// Add a process to the registry. With `force`, an existing registration
    /// is stopped and replaced.
    pub async fn register(&self, descriptor: ProcessDescriptor, force: bool) -> Result<()> {
        if descriptor.id.is_empty() {
            return Err(SupervisorError::InvalidArgument(
                "process id cannot be empty".to_string(),
            ));
        }
        if descriptor.executable_path.is_empty() {
            return Err(SupervisorError::InvalidArgument(
                "executable path cannot be empty".to_string(),
            ));
        }

        let _guard = self.ops.lock().await;

        let existing = self.lookup(&descriptor.id);
        if let Some(existing) = existing {
            if !force {
                return Err(SupervisorError::AlreadyExists(descriptor.id.clone()));
            }
            info!(process_id = %descriptor.id, "Replacing existing registration");
            existing
                .handle
                .stop(self.config.shutdown_timeout)
                .await?;
            existing.handle.dispose();
            self.health.unregister(&descriptor.id);
            self.registry.write().unwrap().remove(&descriptor.id);
        }

        let id = descriptor.id.clone();
        let event_data = json!({ "descriptor": &descriptor });
        self.install(descriptor).await?;
        info!(process_id = %id, "Process registered");

        let event = Event::new(EventType::ProcessRegistered, id.as_str()).with_data(event_data);
        let _ = self.bus.publish_json(topics::EVENTS, &event).await;
        Ok(())
    }

    /// Remove a process from the registry, stopping it first if needed
    pub async fn unregister(&self, id: &str) -> Result<()> {
        let _guard = self.ops.lock().await;

        let managed = self
            .lookup(id)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;

        if managed.handle.status().is_active() {
            managed.handle.stop(self.config.shutdown_timeout).await?;
        }
        managed.handle.dispose();
        self.health.unregister(id);
        self.registry.write().unwrap().remove(id);
        self.state.delete_process(id).await?;

        info!(process_id = id, "Process unregistered");
        Ok(())
    }

    /// Start a process, retrying with exponential backoff
    pub async fn start(&self, id: &str) -> Result<()> {
        let _guard = self.ops.lock().await;
        self.start_locked(id).await
    }

    async fn start_locked(&self, id: &str) -> Result<()> {
        let managed = self
            .lookup(id)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;

        if managed.handle.status().is_running() {
            debug!(process_id = id, "Start ignored, already running");
            return Ok(());
        }

        let mut last_error = String::new();
        for attempt in 1..=self.config.max_start_attempts {
            match managed.handle.start().await {
                Ok(()) => {
                    self.state
                        .update_status(id, managed.handle.status())
                        .await?;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        process_id = id,
                        attempt = attempt,
                        error = %e,
                        "Start attempt failed"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < self.config.max_start_attempts {
                let backoff = Duration::from_secs(START_BACKOFF_BASE.pow(attempt));
                tokio::select! {
                    _ = self.token.cancelled() => {
                        return Err(SupervisorError::StartFailed {
                            id: id.to_string(),
                            attempts: attempt,
                            last_error: "cancelled".to_string(),
                        });
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        self.state
            .update_status(id, managed.handle.status())
            .await?;
        Err(SupervisorError::StartFailed {
            id: id.to_string(),
            attempts: self.config.max_start_attempts,
            last_error,
        })
    }

    /// Gracefully stop a process
    pub async fn stop(&self, id: &str) -> Result<()> {
        let _guard = self.ops.lock().await;
        self.stop_locked(id).await
    }

    async fn stop_locked(&self, id: &str) -> Result<()> {
        let managed = self
            .lookup(id)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;

        if managed.handle.status() == ProcessStatus::Stopped {
            debug!(process_id = id, "Stop ignored, already stopped");
            return Ok(());
        }

        managed.handle.stop(self.config.shutdown_timeout).await?;
        self.state
            .update_status(id, managed.handle.status())
            .await?;
        Ok(())
    }

    /// Stop then start, counting one restart
    pub async fn restart(&self, id: &str) -> Result<()> {
        let _guard = self.ops.lock().await;
        self.stop_locked(id).await?;
        self.start_locked(id).await?;
        if let Some(managed) = self.lookup(id) {
            managed.handle.note_restart();
        }
        Ok(())
    }

    /// Non-blocking snapshot of one registry entry
    pub fn get(&self, id: &str) -> Option<ProcessSnapshot> {
        self.lookup(id).map(|m| self.snapshot_of(&m))
    }

    /// Non-blocking snapshot of the whole registry
    pub fn get_all(&self) -> Vec<ProcessSnapshot> {
        let entries: Vec<Arc<ManagedProcess>> =
            self.registry.read().unwrap().values().cloned().collect();
        entries.iter().map(|m| self.snapshot_of(m)).collect()
    }

    /// The descriptor for one process, if registered
    pub fn descriptor(&self, id: &str) -> Option<ProcessDescriptor> {
        self.lookup(id).map(|m| m.descriptor.clone())
    }

    /// Daemon-wide default for registrations that do not specify auto restart
    pub fn auto_restart_default(&self) -> bool {
        self.config.auto_restart_default
    }

    /// Recent output ring contents for one process
    pub fn output_lines(&self, id: &str, count: usize) -> Result<(Vec<String>, Vec<String>)> {
        let managed = self
            .lookup(id)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
        Ok((
            managed.handle.stdout_lines(count),
            managed.handle.stderr_lines(count),
        ))
    }

    fn lookup(&self, id: &str) -> Option<Arc<ManagedProcess>> {
        self.registry.read().unwrap().get(id).cloned()
    }

    fn snapshot_of(&self, managed: &ManagedProcess) -> ProcessSnapshot {
        let snapshot = managed.handle.snapshot();
        ProcessSnapshot {
            id: managed.descriptor.id.clone(),
            name: managed.descriptor.display_name().to_string(),
            status: snapshot.status,
            pid: snapshot.pid,
            restart_count: snapshot.restart_count,
            uptime_secs: snapshot.uptime_secs(),
            start_time: snapshot.start_time,
            stop_time: snapshot.stop_time,
            last_error: snapshot.last_error,
            warnings: self.health.warnings(&managed.descriptor.id),
        }
    }

    /// One maintenance pass, called by the supervisor tick: converge
    /// persisted status with memory and restart what the policy says should
    /// be running.
    pub async fn maintenance_tick(&self) -> Result<()> {
        let entries: Vec<(String, Arc<ManagedProcess>)> = {
            let registry = self.registry.read().unwrap();
            registry
                .iter()
                .map(|(id, m)| (id.clone(), m.clone()))
                .collect()
        };

        let mut first_error = None;
        for (id, managed) in entries {
            let status = managed.handle.status();
            if let Err(e) = self.state.update_status(&id, status).await {
                warn!(process_id = %id, error = %e, "Tick status persist failed");
                first_error.get_or_insert(e);
                continue;
            }

            match status {
                ProcessStatus::Starting | ProcessStatus::Running => {}
                ProcessStatus::Stopping | ProcessStatus::Stopped => {
                    debug!(process_id = %id, status = %status, "Tick: nothing to do");
                }
                ProcessStatus::Failed | ProcessStatus::Crashed | ProcessStatus::Warning => {
                    if !managed.descriptor.policy.auto_restart {
                        debug!(process_id = %id, "Tick: auto-restart disabled");
                        continue;
                    }
                    info!(process_id = %id, status = %status, "Tick: restarting per policy");
                    if let Err(e) = self.restart(&id).await {
                        warn!(process_id = %id, error = %e, "Tick restart failed");
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Persist and publish every status change a handle reports
    fn spawn_status_relay(&self, id: String, handle: Arc<ProcessHandle>) {
        let state = self.state.clone();
        let bus = self.bus.clone();
        let token = self.token.clone();
        let mut status_rx = handle.subscribe_status();

        tokio::spawn(async move {
            loop {
                let status = tokio::select! {
                    _ = token.cancelled() => break,
                    status = status_rx.recv() => match status {
                        Ok(status) => status,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    },
                };

                if let Err(e) = state.update_status(&id, status).await {
                    warn!(process_id = %id, error = %e, "Relay status persist failed");
                }

                let event_type = match status {
                    ProcessStatus::Running => Some(EventType::ProcessStarted),
                    ProcessStatus::Stopped => Some(EventType::ProcessStopped),
                    ProcessStatus::Crashed => Some(EventType::ProcessCrashed),
                    _ => None,
                };
                if let Some(event_type) = event_type {
                    let event = Event::new(event_type, id.as_str())
                        .with_data(json!({ "pid": handle.snapshot().pid }));
                    let _ = bus.publish_json(topics::EVENTS, &event).await;
                }
            }
        });
    }

    /// System-event consumer: reacts to events on the bus, including ones
    /// published by other daemons or clients.
    async fn consume_events(self: Arc<Self>) {
        let mut subscription = match self.bus.subscribe(topics::EVENTS).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(error = %e, "Event subscription failed");
                return;
            }
        };
        debug!("Event consumer started");

        loop {
            let envelope = tokio::select! {
                _ = self.token.cancelled() => break,
                envelope = subscription.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let event: Event = match envelope.decode() {
                Ok(event) => event,
                Err(e) => {
                    debug!(error = %e, "Ignoring undecodable event");
                    continue;
                }
            };

            if let Err(e) = self.handle_event(&event).await {
                warn!(event_type = %event.event_type, error = %e, "Event handling failed");
            }
        }
        debug!("Event consumer stopped");
    }

    async fn handle_event(&self, event: &Event) -> Result<()> {
        let id = match event.process_id.as_deref() {
            Some(id) => id,
            None => return Ok(()),
        };

        match event.event_type {
            EventType::ProcessRegistered => {
                // Externally announced registration; adopt it if unknown
                let Some(descriptor_value) = event.data.get("descriptor") else {
                    return Ok(());
                };
                let descriptor: ProcessDescriptor =
                    serde_json::from_value(descriptor_value.clone()).map_err(|e| {
                        SupervisorError::InvalidArgument(format!(
                            "bad registration payload: {}",
                            e
                        ))
                    })?;
                match self.register(descriptor, false).await {
                    Ok(()) | Err(SupervisorError::AlreadyExists(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            EventType::ProcessStopped => {
                // Terminal status is persisted by the relay; make sure
                // externally observed stops land too
                self.state.update_status(id, ProcessStatus::Stopped).await
            }
            EventType::ProcessCrashed => {
                self.state.update_status(id, ProcessStatus::Crashed).await?;

                let Some(managed) = self.lookup(id) else {
                    return Ok(());
                };
                if !managed.descriptor.policy.auto_restart {
                    return Ok(());
                }
                let delay = Duration::from_millis(managed.descriptor.policy.restart_delay_ms);
                info!(
                    process_id = id,
                    delay_ms = delay.as_millis() as u64,
                    "Crash detected, restarting per policy"
                );
                tokio::select! {
                    _ = self.token.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
                self.restart(id).await
            }
            _ => Ok(()),
        }
    }

    /// Stop all running processes in parallel and clear the registry
    pub async fn dispose(&self) {
        let entries: Vec<Arc<ManagedProcess>> = {
            let registry = self.registry.read().unwrap();
            registry.values().cloned().collect()
        };

        let timeout = self.config.shutdown_timeout;
        let mut stops = Vec::new();
        for managed in &entries {
            if managed.handle.status().is_active() {
                let handle = managed.handle.clone();
                stops.push(tokio::spawn(async move {
                    let id = handle.id().to_string();
                    if let Err(e) = handle.stop(timeout).await {
                        warn!(process_id = %id, error = %e, "Stop during dispose failed");
                    }
                }));
            }
        }
        for stop in stops {
            let _ = stop.await;
        }

        for managed in &entries {
            let _ = self
                .state
                .update_status(&managed.descriptor.id, managed.handle.status())
                .await;
            managed.handle.dispose();
        }

        self.health.clear();
        self.registry.write().unwrap().clear();
        info!("Process manager disposed");
    }
}

#[async_trait::async_trait]
impl RestartController for ProcessManager {
    async fn restart_for_health(&self, process_id: &str) -> Result<()> {
        self.restart(process_id).await
    }
}
