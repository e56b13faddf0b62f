//! Bus client
//! Publishes commands and awaits the matching response on a private
//! per-invocation channel.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use warden_engine::domain::ports::{topics, Bus, BusExt};
use warden_engine::domain::RESPONSE_CHANNEL_PARAM;
use warden_engine::{Command, Response, Result, SupervisorError};

/// One client session against a daemon's bus
pub struct BusClient {
    bus: Arc<dyn Bus>,
    timeout: Duration,
}

impl BusClient {
    pub fn new(bus: Arc<dyn Bus>, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    /// Send one command and wait for its response
    pub async fn send(&self, mut command: Command) -> Result<Response> {
        let channel = format!("responses:cli:{}", Uuid::new_v4());
        command
            .parameters
            .insert(RESPONSE_CHANNEL_PARAM.to_string(), channel.clone());

        // Subscribe before publishing so the response cannot be missed
        let mut subscription = self.bus.subscribe(&channel).await?;
        self.bus.publish_json(topics::COMMANDS, &command).await?;

        let command_id = command.command_id.clone();
        tokio::time::timeout(self.timeout, async move {
            loop {
                let envelope = subscription
                    .recv()
                    .await
                    .ok_or_else(|| SupervisorError::Bus("bus closed".to_string()))?;
                let response: Response = envelope.decode()?;
                if response.command_id == command_id {
                    return Ok(response);
                }
            }
        })
        .await
        .map_err(|_| {
            SupervisorError::Bus(format!(
                "no response within {}s (is the daemon running?)",
                self.timeout.as_secs()
            ))
        })?
    }
}
