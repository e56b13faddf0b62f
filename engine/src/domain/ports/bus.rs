//! Bus port
//! Topic-based pub/sub consumed by the core. Concrete transports (in-process
//! fan-out, distributed caches) implement this trait; the supervisor never
//! depends on a specific one.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::domain::{Result, SupervisorError};

/// Canonical topic segment separator
pub const TOPIC_SEPARATOR: char = ':';

/// Well-known topic names and helpers
pub mod topics {
    pub const COMMANDS: &str = "commands";
    pub const RESPONSES: &str = "responses";
    pub const EVENTS: &str = "events";

    pub fn metrics(process_id: &str) -> String {
        format!("metrics:{}", process_id)
    }

    pub fn health(process_id: &str) -> String {
        format!("health:{}", process_id)
    }

    pub fn ping(process_id: &str) -> String {
        format!("ping:{}", process_id)
    }

    pub fn pong(process_id: &str) -> String {
        format!("pong:{}", process_id)
    }
}

/// One delivered message
#[derive(Debug, Clone)]
pub struct BusEnvelope {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl BusEnvelope {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| SupervisorError::Bus(format!("payload decode failed: {}", e)))
    }
}

/// Receiving side of one pattern subscription.
/// Messages arrive in publish order per publisher; dropping the subscription
/// cancels it.
pub struct BusSubscription {
    receiver: mpsc::Receiver<BusEnvelope>,
}

impl BusSubscription {
    pub fn new(receiver: mpsc::Receiver<BusEnvelope>) -> Self {
        Self { receiver }
    }

    /// Next message, or `None` once the bus side is gone
    pub async fn recv(&mut self) -> Option<BusEnvelope> {
        self.receiver.recv().await
    }
}

/// Pub/sub transport contract
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a payload. At-least-once; no ordering across topics.
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Subscribe to a topic pattern (`*` = one segment, `#` = any suffix)
    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription>;

    fn is_available(&self) -> bool;
}

/// Serialization convenience over [`Bus::publish`]
#[async_trait]
pub trait BusExt: Bus {
    async fn publish_json<T: Serialize + Sync>(&self, topic: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_value(value)
            .map_err(|e| SupervisorError::Bus(format!("payload encode failed: {}", e)))?;
        self.publish(topic, payload, None).await
    }
}

impl<B: Bus + ?Sized> BusExt for B {}

/// A parsed topic pattern: `:`-separated segments, `*` matching exactly one
/// segment and `#` matching any remaining suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    segments: Vec<PatternSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    Single,
    Rest,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(SupervisorError::InvalidArgument(
                "topic pattern cannot be empty".to_string(),
            ));
        }

        let mut segments = Vec::new();
        for (idx, raw) in pattern.split(TOPIC_SEPARATOR).enumerate() {
            let segment = match raw {
                "*" => PatternSegment::Single,
                "#" => {
                    if idx != pattern.split(TOPIC_SEPARATOR).count() - 1 {
                        return Err(SupervisorError::InvalidArgument(format!(
                            "'#' is only valid as the final segment: {}",
                            pattern
                        )));
                    }
                    PatternSegment::Rest
                }
                literal => PatternSegment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self { segments })
    }

    pub fn matches(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic.split(TOPIC_SEPARATOR).collect();

        for (idx, segment) in self.segments.iter().enumerate() {
            match segment {
                PatternSegment::Rest => return true,
                PatternSegment::Single => {
                    if idx >= parts.len() {
                        return false;
                    }
                }
                PatternSegment::Literal(expected) => {
                    if parts.get(idx).copied() != Some(expected.as_str()) {
                        return false;
                    }
                }
            }
        }

        parts.len() == self.segments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        let p = TopicPattern::parse("commands").unwrap();
        assert!(p.matches("commands"));
        assert!(!p.matches("responses"));
        assert!(!p.matches("commands:sub"));
    }

    #[test]
    fn test_single_segment_wildcard() {
        let p = TopicPattern::parse("health:*").unwrap();
        assert!(p.matches("health:web"));
        assert!(!p.matches("health"));
        assert!(!p.matches("health:web:extra"));
        assert!(!p.matches("metrics:web"));
    }

    #[test]
    fn test_multi_segment_wildcard() {
        let p = TopicPattern::parse("metrics:#").unwrap();
        assert!(p.matches("metrics:web"));
        assert!(p.matches("metrics:web:cpu"));
        assert!(!p.matches("health:web"));

        let all = TopicPattern::parse("#").unwrap();
        assert!(all.matches("anything"));
        assert!(all.matches("a:b:c"));
    }

    #[test]
    fn test_hash_must_be_last() {
        assert!(TopicPattern::parse("a:#:b").is_err());
        assert!(TopicPattern::parse("").is_err());
    }

    #[test]
    fn test_topic_helpers() {
        assert_eq!(topics::metrics("web"), "metrics:web");
        assert_eq!(topics::health("web"), "health:web");
        assert_eq!(topics::ping("web"), "ping:web");
        assert_eq!(topics::pong("web"), "pong:web");
    }
}
