//! Supervisor errors
//! Business-rule and component-boundary failures; transport errors are
//! converted into this taxonomy at the port implementations.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SupervisorError {
    #[error("Process '{0}' not found")]
    NotFound(String),

    #[error("Process '{0}' already exists")]
    AlreadyExists(String),

    #[error("Process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Failed to spawn process '{id}': {reason}")]
    SpawnFailed { id: String, reason: String },

    #[error("Failed to start process '{id}' after {attempts} attempts: {last_error}")]
    StartFailed {
        id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Bus error: {0}")]
    Bus(String),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
