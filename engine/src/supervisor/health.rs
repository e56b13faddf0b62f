//! HealthMonitor
//! Periodic resource sampling for every supervised process, threshold
//! evaluation, and the restart-consideration policy. Restarts are requested
//! through the injected RestartController callback, never by reaching back
//! into the registry directly.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::*;
use crate::domain::ports::{topics, Bus, BusExt, ResourceSampler, RestartController};
use crate::domain::{Event, EventType, MetricSample, ProcessDescriptor, ProcessStatus, RestartPolicy};
use crate::supervisor::handle::ProcessHandle;
use crate::supervisor::state::StateManager;

/// Global sampling configuration; per-process thresholds live on the
/// descriptor policy.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub check_interval: Duration,
    pub cpu_warn_pct: f64,
    pub mem_warn_bytes: u64,
    pub max_restart_attempts: u32,
    pub restart_cooldown: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            cpu_warn_pct: DEFAULT_CPU_WARN_PCT,
            mem_warn_bytes: DEFAULT_MEM_WARN_BYTES,
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            restart_cooldown: Duration::from_secs(DEFAULT_RESTART_COOLDOWN_SECS),
        }
    }
}

struct HealthEntry {
    handle: Arc<ProcessHandle>,
    policy: RestartPolicy,
    warned: bool,
    warnings: Option<String>,
    consecutive_restart_attempts: u32,
    last_restart_at: Option<Instant>,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
    last_status: ProcessStatus,
    listener: JoinHandle<()>,
}

type EntryMap = Arc<StdMutex<HashMap<String, HealthEntry>>>;

/// Periodic sampler and restart-policy evaluator
pub struct HealthMonitor {
    entries: EntryMap,
    state: Arc<StateManager>,
    bus: Arc<dyn Bus>,
    sampler: Arc<dyn ResourceSampler>,
    config: HealthConfig,
    restarter: StdMutex<Option<Weak<dyn RestartController>>>,
}

impl HealthMonitor {
    pub fn new(
        state: Arc<StateManager>,
        bus: Arc<dyn Bus>,
        sampler: Arc<dyn ResourceSampler>,
        config: HealthConfig,
    ) -> Self {
        Self {
            entries: Arc::new(StdMutex::new(HashMap::new())),
            state,
            bus,
            sampler,
            config,
            restarter: StdMutex::new(None),
        }
    }

    /// Inject the restart callback; wired once by the supervisor root
    pub fn set_restart_controller(&self, controller: Weak<dyn RestartController>) {
        *self.restarter.lock().unwrap() = Some(controller);
    }

    /// Track a supervised process. Spawns a listener that keeps the status
    /// map current from the handle's notification channels.
    pub fn register(&self, descriptor: &ProcessDescriptor, handle: Arc<ProcessHandle>) {
        let id = descriptor.id.clone();
        let listener = spawn_listener(self.entries.clone(), id.clone(), handle.clone());

        let entry = HealthEntry {
            handle,
            policy: descriptor.policy.clone(),
            warned: false,
            warnings: None,
            consecutive_restart_attempts: 0,
            last_restart_at: None,
            last_error: None,
            last_error_at: None,
            last_status: ProcessStatus::Stopped,
            listener,
        };

        let mut entries = self.entries.lock().unwrap();
        if let Some(previous) = entries.insert(id.clone(), entry) {
            previous.listener.abort();
        }
        debug!(process_id = %id, "Registered with health monitor");
    }

    pub fn unregister(&self, id: &str) {
        if let Some(entry) = self.entries.lock().unwrap().remove(id) {
            entry.listener.abort();
            debug!(process_id = id, "Unregistered from health monitor");
        }
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap();
        for (_, entry) in entries.drain() {
            entry.listener.abort();
        }
    }

    /// Current warnings string for a process, if any
    pub fn warnings(&self, id: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(id)
            .and_then(|e| e.warnings.clone())
    }

    /// Last stderr line recorded for a process
    pub fn last_error(&self, id: &str) -> Option<(String, DateTime<Utc>)> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(id)?;
        Some((entry.last_error.clone()?, entry.last_error_at?))
    }

    /// Last status observed on the handle's notification channel
    pub fn last_status(&self, id: &str) -> Option<ProcessStatus> {
        self.entries.lock().unwrap().get(id).map(|e| e.last_status)
    }

    /// Run the periodic sampling loop until cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!(
            interval_secs = self.config.check_interval.as_secs(),
            "Health monitor started"
        );
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval() fires immediately; skip that first tick so freshly
        // started processes get one full interval before sampling
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
        info!("Health monitor stopped");
    }

    /// One sampling pass over every running process
    pub async fn tick(&self) {
        let targets: Vec<(String, Arc<ProcessHandle>, RestartPolicy)> = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .filter(|(_, e)| e.handle.status().is_running())
                .map(|(id, e)| (id.clone(), e.handle.clone(), e.policy.clone()))
                .collect()
        };

        for (id, handle, policy) in targets {
            let pid = match handle.snapshot().pid {
                Some(pid) => pid,
                None => continue,
            };
            let snapshot = match self.sampler.sample(pid) {
                Some(snapshot) => snapshot,
                None => {
                    debug!(process_id = %id, pid = pid, "Sample unavailable");
                    continue;
                }
            };
            let sample = MetricSample::from_snapshot(id.clone(), snapshot);

            // Storage is the durability point; publication is best-effort
            if let Err(e) = self.state.save_metrics(&sample).await {
                warn!(process_id = %id, error = %e, "Failed to persist metric sample");
            }
            let _ = self.bus.publish_json(&topics::metrics(&id), &sample).await;

            self.evaluate(&id, &handle, &policy, &sample).await;
        }
    }

    async fn evaluate(
        &self,
        id: &str,
        handle: &Arc<ProcessHandle>,
        policy: &RestartPolicy,
        sample: &MetricSample,
    ) {
        let mut warnings = Vec::new();
        if policy.cpu_warn_pct > 0.0 && sample.cpu_pct > policy.cpu_warn_pct {
            warnings.push(format!(
                "cpu {:.2}% exceeds {:.2}%",
                sample.cpu_pct, policy.cpu_warn_pct
            ));
        }
        if policy.mem_warn_bytes > 0 && sample.memory_bytes > policy.mem_warn_bytes {
            warnings.push(format!(
                "memory {} exceeds {}",
                sample.memory_bytes, policy.mem_warn_bytes
            ));
        }
        let warning = !warnings.is_empty();
        let warnings_text = warning.then(|| warnings.join("; "));

        let severe = (policy.cpu_warn_pct > 0.0
            && sample.cpu_pct > policy.cpu_warn_pct * RESTART_THRESHOLD_FACTOR)
            || (policy.mem_warn_bytes > 0
                && sample.memory_bytes as f64
                    > policy.mem_warn_bytes as f64 * RESTART_THRESHOLD_FACTOR);

        let was_warned = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(id) {
                Some(entry) => {
                    let was = entry.warned;
                    entry.warned = warning;
                    entry.warnings = warnings_text.clone();
                    was
                }
                None => return,
            }
        };

        handle.set_warning(warning);

        // health.{id} carries the full picture every tick
        let _ = self
            .bus
            .publish_json(
                &topics::health(id),
                &json!({
                    "process_id": id,
                    "metrics": sample,
                    "status": handle.status(),
                    "warnings": warnings_text,
                    "timestamp": Utc::now(),
                }),
            )
            .await;

        if warning {
            warn!(
                process_id = id,
                warnings = warnings_text.as_deref().unwrap_or(""),
                "Health thresholds exceeded"
            );
            let event = Event::new(EventType::HealthWarning, id)
                .with_data(json!({ "warnings": warnings_text }));
            let _ = self.bus.publish_json(topics::EVENTS, &event).await;
        } else if was_warned {
            info!(process_id = id, "Health back to normal");
            let event = Event::new(EventType::HealthOk, id);
            let _ = self.bus.publish_json(topics::EVENTS, &event).await;
        }

        if severe {
            self.consider_restart(id, policy).await;
        }
    }

    /// Restart-consideration policy: bounded attempts, then a cooldown
    async fn consider_restart(&self, id: &str, policy: &RestartPolicy) {
        let cooldown = Duration::from_secs(policy.restart_cooldown_secs);

        let proceed = {
            let mut entries = self.entries.lock().unwrap();
            let entry = match entries.get_mut(id) {
                Some(entry) => entry,
                None => return,
            };

            if entry.consecutive_restart_attempts >= policy.max_restart_attempts {
                let within_cooldown = entry
                    .last_restart_at
                    .map(|at| at.elapsed() <= cooldown)
                    .unwrap_or(false);
                if within_cooldown {
                    debug!(
                        process_id = id,
                        attempts = entry.consecutive_restart_attempts,
                        "Restart attempts exhausted, in cooldown"
                    );
                    false
                } else {
                    // Cooldown has passed; this attempt counts as attempt 1
                    entry.consecutive_restart_attempts = 0;
                    true
                }
            } else {
                true
            }
        };
        if !proceed {
            return;
        }

        let controller = self
            .restarter
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade);
        let controller = match controller {
            Some(controller) => controller,
            None => {
                warn!(process_id = id, "No restart controller wired");
                return;
            }
        };

        info!(process_id = id, "Health policy requesting restart");
        match controller.restart_for_health(id).await {
            Ok(()) => {
                let mut entries = self.entries.lock().unwrap();
                if let Some(entry) = entries.get_mut(id) {
                    entry.consecutive_restart_attempts += 1;
                    entry.last_restart_at = Some(Instant::now());
                }
            }
            Err(e) => {
                // The next tick retries subject to the same policy
                warn!(process_id = id, error = %e, "Health-driven restart failed");
            }
        }
    }
}

/// Drain a handle's stderr/status channels into the entry map
fn spawn_listener(entries: EntryMap, id: String, handle: Arc<ProcessHandle>) -> JoinHandle<()> {
    let mut stderr_rx = handle.subscribe_stderr();
    let mut status_rx = handle.subscribe_status();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                line = stderr_rx.recv() => match line {
                    Ok(line) => {
                        let mut entries = entries.lock().unwrap();
                        if let Some(entry) = entries.get_mut(&id) {
                            entry.last_error = Some(line);
                            entry.last_error_at = Some(Utc::now());
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                status = status_rx.recv() => match status {
                    Ok(status) => {
                        let mut entries = entries.lock().unwrap();
                        if let Some(entry) = entries.get_mut(&id) {
                            entry.last_status = status;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}
