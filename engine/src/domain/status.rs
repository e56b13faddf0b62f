//! ProcessStatus value object
//! Lifecycle state of a supervised process

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::SupervisorError;

/// The state of a supervised process in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// No live OS child; the initial state and the clean-exit terminal state
    #[default]
    Stopped,

    /// A spawn is in progress
    Starting,

    /// The child is alive
    Running,

    /// Graceful termination is in progress
    Stopping,

    /// The spawn itself failed
    Failed,

    /// The child exited with a non-zero code or died unexpectedly
    Crashed,

    /// Running, but a health threshold is exceeded
    Warning,
}

impl ProcessStatus {
    /// True while there may be a live OS child
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Starting
                | ProcessStatus::Running
                | ProcessStatus::Warning
                | ProcessStatus::Stopping
        )
    }

    /// True when the process is serving (health sampling applies)
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running | ProcessStatus::Warning)
    }

    /// Terminal states: no live child, `Start` is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Stopped | ProcessStatus::Failed | ProcessStatus::Crashed
        )
    }

    pub fn can_start(&self) -> bool {
        self.is_terminal()
    }

    pub fn can_transition_to(&self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;

        match (self, next) {
            // Any terminal state can be started again
            (Stopped | Failed | Crashed, Starting) => true,

            // From Starting
            (Starting, Running) => true,
            (Starting, Failed) => true,
            (Starting, Stopping) => true,

            // From Running
            (Running, Stopping) => true,
            (Running, Warning) => true,
            (Running, Stopped) => true, // spontaneous clean exit
            (Running, Crashed) => true,

            // From Warning (still running)
            (Warning, Running) => true,
            (Warning, Stopping) => true,
            (Warning, Stopped) => true,
            (Warning, Crashed) => true,

            // From Stopping
            (Stopping, Stopped) => true,
            (Stopping, Crashed) => true,

            (a, b) if *a == b => true,

            _ => false,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Crashed => "crashed",
            ProcessStatus::Warning => "warning",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ProcessStatus {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(ProcessStatus::Stopped),
            "starting" => Ok(ProcessStatus::Starting),
            "running" => Ok(ProcessStatus::Running),
            "stopping" => Ok(ProcessStatus::Stopping),
            "failed" => Ok(ProcessStatus::Failed),
            "crashed" => Ok(ProcessStatus::Crashed),
            "warning" => Ok(ProcessStatus::Warning),
            other => Err(SupervisorError::InvalidArgument(format!(
                "unknown process status '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_running() {
        assert!(ProcessStatus::Running.is_running());
        assert!(ProcessStatus::Warning.is_running());
        assert!(!ProcessStatus::Starting.is_running());
        assert!(!ProcessStatus::Stopped.is_running());
    }

    #[test]
    fn test_terminal_states_can_start() {
        assert!(ProcessStatus::Stopped.can_start());
        assert!(ProcessStatus::Failed.can_start());
        assert!(ProcessStatus::Crashed.can_start());
        assert!(!ProcessStatus::Running.can_start());
        assert!(!ProcessStatus::Stopping.can_start());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(ProcessStatus::Stopped.can_transition_to(ProcessStatus::Starting));
        assert!(ProcessStatus::Starting.can_transition_to(ProcessStatus::Running));
        assert!(ProcessStatus::Starting.can_transition_to(ProcessStatus::Failed));
        assert!(ProcessStatus::Running.can_transition_to(ProcessStatus::Stopping));
        assert!(ProcessStatus::Stopping.can_transition_to(ProcessStatus::Stopped));
        assert!(ProcessStatus::Running.can_transition_to(ProcessStatus::Crashed));
        assert!(ProcessStatus::Running.can_transition_to(ProcessStatus::Warning));
        assert!(ProcessStatus::Warning.can_transition_to(ProcessStatus::Running));
        assert!(ProcessStatus::Crashed.can_transition_to(ProcessStatus::Starting));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!ProcessStatus::Stopped.can_transition_to(ProcessStatus::Running));
        assert!(!ProcessStatus::Running.can_transition_to(ProcessStatus::Starting));
        assert!(!ProcessStatus::Stopped.can_transition_to(ProcessStatus::Warning));
        assert!(!ProcessStatus::Failed.can_transition_to(ProcessStatus::Stopping));
    }

    #[test]
    fn test_display_round_trip() {
        for status in [
            ProcessStatus::Stopped,
            ProcessStatus::Starting,
            ProcessStatus::Running,
            ProcessStatus::Stopping,
            ProcessStatus::Failed,
            ProcessStatus::Crashed,
            ProcessStatus::Warning,
        ] {
            assert_eq!(status.to_string().parse::<ProcessStatus>().unwrap(), status);
        }
    }
}
