//! Event bus records
//! Every state change fans out on the `events` topic as one of these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recognized event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "process.registered")]
    ProcessRegistered,

    #[serde(rename = "process.started")]
    ProcessStarted,

    #[serde(rename = "process.stopped")]
    ProcessStopped,

    #[serde(rename = "process.crashed")]
    ProcessCrashed,

    #[serde(rename = "health.warning")]
    HealthWarning,

    #[serde(rename = "health.ok")]
    HealthOk,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::ProcessRegistered => "process.registered",
            EventType::ProcessStarted => "process.started",
            EventType::ProcessStopped => "process.stopped",
            EventType::ProcessCrashed => "process.crashed",
            EventType::HealthWarning => "health.warning",
            EventType::HealthOk => "health.ok",
        };
        write!(f, "{}", s)
    }
}

/// A typed notification about one state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,

    #[serde(default)]
    pub process_id: Option<String>,

    #[serde(default)]
    pub data: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, process_id: impl Into<String>) -> Self {
        Self {
            event_type,
            process_id: Some(process_id.into()),
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
