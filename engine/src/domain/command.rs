//! Command / Response bus records
//! The command surface of the daemon; published on the `commands` topic and
//! answered on `responses` (or the per-command override channel).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::ports::topics;

/// Parameter key a client sets to receive the response on a private topic
pub const RESPONSE_CHANNEL_PARAM: &str = "responseChannel";

/// Parameter key naming the target process for process-scoped commands
pub const PROCESS_ID_PARAM: &str = "processId";

/// A request published by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: String,
    pub command_type: String,

    #[serde(default)]
    pub target_process_id: Option<String>,

    #[serde(default)]
    pub parameters: HashMap<String, String>,

    pub timestamp: DateTime<Utc>,
}

impl Command {
    pub fn new(command_type: impl Into<String>) -> Self {
        Self {
            command_id: Uuid::new_v4().to_string(),
            command_type: command_type.into(),
            target_process_id: None,
            parameters: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_target(mut self, process_id: impl Into<String>) -> Self {
        self.target_process_id = Some(process_id.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// The process this command addresses: the explicit target field, or the
    /// `processId` parameter.
    pub fn process_id(&self) -> Option<&str> {
        self.target_process_id
            .as_deref()
            .or_else(|| self.parameter(PROCESS_ID_PARAM))
    }

    /// Topic the response should be published on
    pub fn response_channel(&self) -> &str {
        self.parameter(RESPONSE_CHANNEL_PARAM)
            .unwrap_or(topics::RESPONSES)
    }
}

/// The outcome of a command, published back to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub command_id: String,
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

impl Response {
    pub fn ok(command_id: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            command_id: command_id.into(),
            success: true,
            error: None,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(command_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            success: false,
            error: Some(error.into()),
            data: None,
            timestamp: Utc::now(),
        }
    }
}
