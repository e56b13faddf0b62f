//! In-process bus
//! Thread-safe fan-out pub/sub suitable for single-instance deployments and
//! tests. Delivery to a slow subscriber is lossy: the queue is bounded and
//! messages are dropped rather than blocking the publisher.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::constants::BUS_CHANNEL_CAPACITY;
use crate::domain::ports::{Bus, BusEnvelope, BusSubscription, TopicPattern};
use crate::domain::Result;

struct Subscriber {
    pattern: TopicPattern,
    sender: mpsc::Sender<BusEnvelope>,
}

/// In-process pub/sub transport
pub struct InMemoryBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        _ttl: Option<Duration>,
    ) -> Result<()> {
        let targets: Vec<mpsc::Sender<BusEnvelope>> = {
            let mut subscribers = self.subscribers.lock().unwrap();
            // Drop subscriptions whose receivers are gone
            subscribers.retain(|s| !s.sender.is_closed());
            subscribers
                .iter()
                .filter(|s| s.pattern.matches(topic))
                .map(|s| s.sender.clone())
                .collect()
        };

        trace!(topic = topic, subscribers = targets.len(), "Publishing message");

        for sender in targets {
            let envelope = BusEnvelope {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            if sender.try_send(envelope).is_err() {
                debug!(topic = topic, "Dropping message for slow subscriber");
            }
        }

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription> {
        let pattern = TopicPattern::parse(pattern)?;
        let (tx, rx) = mpsc::channel(BUS_CHANNEL_CAPACITY);

        self.subscribers.lock().unwrap().push(Subscriber {
            pattern,
            sender: tx,
        });

        Ok(BusSubscription::new(rx))
    }

    fn is_available(&self) -> bool {
        true
    }
}
