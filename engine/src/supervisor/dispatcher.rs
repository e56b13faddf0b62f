//! CommandDispatcher
//! Subscribes to the commands topic, routes to registered handlers, and
//! publishes responses. A handler failure becomes a failure Response; the
//! receive loop never dies with it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::domain::ports::{Bus, BusExt};
use crate::domain::{Command, Response, Result};
use crate::supervisor::handlers::CommandHandler;

/// Routes commands from the bus to handlers
pub struct CommandDispatcher {
    bus: Arc<dyn Bus>,
    command_topic: String,
    handlers: Arc<StdMutex<HashMap<String, Arc<dyn CommandHandler>>>>,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl CommandDispatcher {
    pub fn new(bus: Arc<dyn Bus>, command_topic: impl Into<String>) -> Self {
        Self {
            bus,
            command_topic: command_topic.into(),
            handlers: Arc::new(StdMutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Register (or replace) the handler for a command type
    pub fn register_handler(&self, command_type: &str, handler: Arc<dyn CommandHandler>) {
        self.handlers
            .lock()
            .unwrap()
            .insert(command_type.to_lowercase(), handler);
    }

    /// Spawn the receive loop; idempotent
    pub async fn start(&self, token: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut subscription = self.bus.subscribe(&self.command_topic).await?;
        let bus = self.bus.clone();
        let handlers = self.handlers.clone();
        let tracker = self.tracker.clone();
        let topic = self.command_topic.clone();

        self.tracker.spawn(async move {
            info!(topic = %topic, "Command dispatcher started");
            loop {
                let envelope = tokio::select! {
                    _ = token.cancelled() => break,
                    envelope = subscription.recv() => match envelope {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };

                let command: Command = match envelope.decode() {
                    Ok(command) => command,
                    Err(e) => {
                        warn!(error = %e, "Ignoring undecodable command");
                        continue;
                    }
                };

                let handler = {
                    let handlers = handlers.lock().unwrap();
                    handlers.get(&command.command_type.to_lowercase()).cloned()
                };
                let bus = bus.clone();
                tracker.spawn(async move {
                    dispatch(bus, handler, command).await;
                });
            }
            info!("Command dispatcher stopped");
        });

        Ok(())
    }

    /// Stop accepting work and drain in-flight handlers up to `timeout`
    pub async fn stop(&self, timeout: Duration) {
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!("Dispatcher drain timed out, abandoning in-flight handlers");
        }
    }
}

/// Run one command and publish its response
async fn dispatch(bus: Arc<dyn Bus>, handler: Option<Arc<dyn CommandHandler>>, command: Command) {
    let response = if command.command_type.is_empty() {
        Response::failure(command.command_id.clone(), "missing command type")
    } else {
        match handler {
            None => Response::failure(
                command.command_id.clone(),
                format!("unknown command type '{}'", command.command_type),
            ),
            Some(handler) => match handler.handle(&command).await {
                Ok(data) => Response::ok(command.command_id.clone(), Some(data)),
                Err(e) => Response::failure(command.command_id.clone(), e.to_string()),
            },
        }
    };

    let channel = command.response_channel();
    debug!(
        command_id = %command.command_id,
        command_type = %command.command_type,
        success = response.success,
        channel = channel,
        "Command handled"
    );
    if let Err(e) = bus.publish_json(channel, &response).await {
        warn!(command_id = %command.command_id, error = %e, "Response publish failed");
    }
}
