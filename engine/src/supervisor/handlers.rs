//! Core command handlers
//! One handler per command type, each a thin validation layer over the
//! ProcessManager. Handlers return data for a success Response or an error
//! the dispatcher serializes into a failure Response.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::constants::OUTPUT_RING_CAPACITY;
use crate::domain::{
    Command, ProcessDescriptor, ProcessStatus, RestartPolicy, Result, SupervisorError,
};
use crate::supervisor::dispatcher::CommandDispatcher;
use crate::supervisor::manager::ProcessManager;

/// A routable command implementation
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: &Command) -> Result<Value>;
}

/// Register the built-in handler set on a dispatcher
pub fn register_core_handlers(dispatcher: &CommandDispatcher, manager: Arc<ProcessManager>) {
    dispatcher.register_handler("start", Arc::new(StartHandler(manager.clone())));
    dispatcher.register_handler("stop", Arc::new(StopHandler(manager.clone())));
    dispatcher.register_handler("restart", Arc::new(RestartHandler(manager.clone())));
    dispatcher.register_handler("status", Arc::new(StatusHandler(manager.clone())));
    dispatcher.register_handler("register", Arc::new(RegisterHandler(manager.clone())));
    dispatcher.register_handler("unregister", Arc::new(UnregisterHandler(manager.clone())));
    dispatcher.register_handler("run", Arc::new(RunHandler(manager.clone())));
    dispatcher.register_handler("logs", Arc::new(LogsHandler(manager)));
    dispatcher.register_handler("ping", Arc::new(PingHandler));
}

fn require_process_id(command: &Command) -> Result<&str> {
    command.process_id().ok_or_else(|| {
        SupervisorError::InvalidArgument(format!(
            "command '{}' requires a processId parameter",
            command.command_type
        ))
    })
}

fn status_payload(manager: &ProcessManager, id: &str) -> Result<Value> {
    let snapshot = manager
        .get(id)
        .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
    serde_json::to_value(snapshot)
        .map_err(|e| SupervisorError::InvalidArgument(format!("snapshot encode failed: {}", e)))
}

struct StartHandler(Arc<ProcessManager>);

#[async_trait]
impl CommandHandler for StartHandler {
    async fn handle(&self, command: &Command) -> Result<Value> {
        let id = require_process_id(command)?;
        self.0.start(id).await?;
        status_payload(&self.0, id)
    }
}

struct StopHandler(Arc<ProcessManager>);

#[async_trait]
impl CommandHandler for StopHandler {
    async fn handle(&self, command: &Command) -> Result<Value> {
        let id = require_process_id(command)?;
        self.0.stop(id).await?;
        status_payload(&self.0, id)
    }
}

struct RestartHandler(Arc<ProcessManager>);

#[async_trait]
impl CommandHandler for RestartHandler {
    async fn handle(&self, command: &Command) -> Result<Value> {
        let id = require_process_id(command)?;
        self.0.restart(id).await?;
        status_payload(&self.0, id)
    }
}

/// With a `processId`: one snapshot. Without: every registered process.
struct StatusHandler(Arc<ProcessManager>);

#[async_trait]
impl CommandHandler for StatusHandler {
    async fn handle(&self, command: &Command) -> Result<Value> {
        match command.process_id() {
            Some(id) => status_payload(&self.0, id),
            None => serde_json::to_value(self.0.get_all()).map_err(|e| {
                SupervisorError::InvalidArgument(format!("snapshot encode failed: {}", e))
            }),
        }
    }
}

struct RegisterHandler(Arc<ProcessManager>);

#[async_trait]
impl CommandHandler for RegisterHandler {
    async fn handle(&self, command: &Command) -> Result<Value> {
        let descriptor = descriptor_from_parameters(command, self.0.auto_restart_default())?;
        let force = bool_parameter(command, "force")?.unwrap_or(false);
        let id = descriptor.id.clone();
        self.0.register(descriptor, force).await?;
        status_payload(&self.0, &id)
    }
}

struct UnregisterHandler(Arc<ProcessManager>);

#[async_trait]
impl CommandHandler for UnregisterHandler {
    async fn handle(&self, command: &Command) -> Result<Value> {
        let id = require_process_id(command)?;
        self.0.unregister(id).await?;
        Ok(json!({ "processId": id, "unregistered": true }))
    }
}

/// Register-if-absent then start, in one command
struct RunHandler(Arc<ProcessManager>);

#[async_trait]
impl CommandHandler for RunHandler {
    async fn handle(&self, command: &Command) -> Result<Value> {
        let id = require_process_id(command)?.to_string();
        if self.0.get(&id).is_none() {
            let descriptor =
                descriptor_from_parameters(command, self.0.auto_restart_default())?;
            self.0.register(descriptor, false).await?;
        }
        self.0.start(&id).await?;
        status_payload(&self.0, &id)
    }
}

/// Recent stdout/stderr ring contents
struct LogsHandler(Arc<ProcessManager>);

#[async_trait]
impl CommandHandler for LogsHandler {
    async fn handle(&self, command: &Command) -> Result<Value> {
        let id = require_process_id(command)?;
        let count = match command.parameter("lines") {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                SupervisorError::InvalidArgument(format!("invalid lines value '{}'", raw))
            })?,
            None => OUTPUT_RING_CAPACITY,
        };
        let (stdout, stderr) = self.0.output_lines(id, count)?;
        Ok(json!({ "processId": id, "stdout": stdout, "stderr": stderr }))
    }
}

/// Constant liveness answer
struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn handle(&self, _command: &Command) -> Result<Value> {
        Ok(json!({
            "status": ProcessStatus::Running,
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": Utc::now(),
        }))
    }
}

fn bool_parameter(command: &Command, key: &str) -> Result<Option<bool>> {
    command
        .parameter(key)
        .map(|raw| {
            raw.parse::<bool>().map_err(|_| {
                SupervisorError::InvalidArgument(format!("invalid {} value '{}'", key, raw))
            })
        })
        .transpose()
}

fn u64_parameter(command: &Command, key: &str) -> Result<Option<u64>> {
    command
        .parameter(key)
        .map(|raw| {
            raw.parse::<u64>().map_err(|_| {
                SupervisorError::InvalidArgument(format!("invalid {} value '{}'", key, raw))
            })
        })
        .transpose()
}

fn map_parameter(command: &Command, key: &str) -> Result<Option<HashMap<String, String>>> {
    command
        .parameter(key)
        .map(|raw| {
            serde_json::from_str(raw).map_err(|_| {
                SupervisorError::InvalidArgument(format!(
                    "{} must be a JSON object of strings",
                    key
                ))
            })
        })
        .transpose()
}

/// Build a descriptor from the flat string parameters of a `register`/`run`
/// command. The daemon-wide auto-restart default applies when the command
/// does not specify the field; the per-process value wins once set.
fn descriptor_from_parameters(
    command: &Command,
    auto_restart_default: bool,
) -> Result<ProcessDescriptor> {
    let id = require_process_id(command)?;
    let executable_path = command.parameter("executablePath").ok_or_else(|| {
        SupervisorError::InvalidArgument("register requires an executablePath parameter".into())
    })?;

    let mut builder = ProcessDescriptor::builder(id, executable_path);

    if let Some(name) = command.parameter("name") {
        builder = builder.name(name);
    }
    if let Some(kind) = command.parameter("type") {
        builder = builder.kind(kind);
    }
    if let Some(version) = command.parameter("version") {
        builder = builder.version(version);
    }
    if let Some(arguments) = command.parameter("arguments") {
        builder = builder.args(arguments.split_whitespace().map(String::from).collect());
    }
    if let Some(dir) = command.parameter("workingDirectory") {
        builder = builder.working_directory(dir);
    }
    if let Some(environment) = map_parameter(command, "environment")? {
        builder = builder.environment(environment);
    }
    if let Some(configuration) = map_parameter(command, "configuration")? {
        builder = builder.configuration(configuration);
    }

    let mut policy = RestartPolicy {
        auto_restart: auto_restart_default,
        ..RestartPolicy::default()
    };
    if let Some(auto_restart) = bool_parameter(command, "autoRestart")? {
        policy.auto_restart = auto_restart;
    }
    if let Some(delay) = u64_parameter(command, "restartDelayMs")? {
        policy.restart_delay_ms = delay;
    }
    if let Some(attempts) = u64_parameter(command, "maxRestartAttempts")? {
        policy.max_restart_attempts = attempts as u32;
    }
    if let Some(cooldown) = u64_parameter(command, "restartCooldownSecs")? {
        policy.restart_cooldown_secs = cooldown;
    }
    if let Some(cpu) = command.parameter("cpuWarnPct") {
        policy.cpu_warn_pct = cpu.parse().map_err(|_| {
            SupervisorError::InvalidArgument(format!("invalid cpuWarnPct value '{}'", cpu))
        })?;
    }
    if let Some(mem) = u64_parameter(command, "memWarnBytes")? {
        policy.mem_warn_bytes = mem;
    }

    builder.policy(policy).build()
}
