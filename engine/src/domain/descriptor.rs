//! ProcessDescriptor entity
//! Static identity and restart policy of a supervised process

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::*;
use crate::domain::{Result, SupervisorError};

/// Descriptive metadata attached to a process
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessMetadata {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub environment: HashMap<String, String>,

    #[serde(default)]
    pub configuration: HashMap<String, String>,
}

/// Restart and health-threshold policy for one process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RestartPolicy {
    pub auto_restart: bool,
    pub restart_delay_ms: u64,
    pub max_restart_attempts: u32,
    pub restart_cooldown_secs: u64,
    pub cpu_warn_pct: f64,
    pub mem_warn_bytes: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            auto_restart: true,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            restart_cooldown_secs: DEFAULT_RESTART_COOLDOWN_SECS,
            cpu_warn_pct: DEFAULT_CPU_WARN_PCT,
            mem_warn_bytes: DEFAULT_MEM_WARN_BYTES,
        }
    }
}

/// The supervised-process identity, owned by the ProcessManager registry.
/// The StateManager persists a serialized snapshot of this record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessDescriptor {
    pub id: String,

    #[serde(default)]
    pub metadata: ProcessMetadata,

    pub executable_path: String,

    #[serde(default)]
    pub arguments: Vec<String>,

    #[serde(default)]
    pub working_directory: Option<String>,

    #[serde(default)]
    pub policy: RestartPolicy,
}

impl ProcessDescriptor {
    /// Create a builder for constructing a descriptor with validation
    pub fn builder(id: impl Into<String>, executable_path: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(id, executable_path)
    }

    /// Display name: explicit metadata name or the id
    pub fn display_name(&self) -> &str {
        if self.metadata.name.is_empty() {
            &self.id
        } else {
            &self.metadata.name
        }
    }
}

/// Builder for `ProcessDescriptor`
pub struct DescriptorBuilder {
    id: String,
    executable_path: String,
    metadata: ProcessMetadata,
    arguments: Vec<String>,
    working_directory: Option<String>,
    policy: RestartPolicy,
}

impl DescriptorBuilder {
    pub fn new(id: impl Into<String>, executable_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            executable_path: executable_path.into(),
            metadata: ProcessMetadata::default(),
            arguments: Vec::new(),
            working_directory: None,
            policy: RestartPolicy::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.metadata.kind = kind.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = version.into();
        self
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.arguments = args;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.environment.insert(key.into(), value.into());
        self
    }

    pub fn environment(mut self, env: HashMap<String, String>) -> Self {
        self.metadata.environment = env;
        self
    }

    pub fn configuration(mut self, configuration: HashMap<String, String>) -> Self {
        self.metadata.configuration = configuration;
        self
    }

    pub fn policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn auto_restart(mut self, enabled: bool) -> Self {
        self.policy.auto_restart = enabled;
        self
    }

    pub fn restart_delay_ms(mut self, millis: u64) -> Self {
        self.policy.restart_delay_ms = millis;
        self
    }

    pub fn max_restart_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_restart_attempts = attempts;
        self
    }

    /// Build the descriptor with validation
    pub fn build(self) -> Result<ProcessDescriptor> {
        if self.id.is_empty() {
            return Err(SupervisorError::InvalidArgument(
                "process id cannot be empty".to_string(),
            ));
        }
        if self.id.contains(char::is_whitespace) {
            return Err(SupervisorError::InvalidArgument(format!(
                "process id '{}' cannot contain whitespace",
                self.id
            )));
        }
        if self.executable_path.is_empty() {
            return Err(SupervisorError::InvalidArgument(
                "executable path cannot be empty".to_string(),
            ));
        }
        if self.policy.max_restart_attempts < 1 {
            return Err(SupervisorError::InvalidArgument(
                "max_restart_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.policy.cpu_warn_pct) {
            return Err(SupervisorError::InvalidArgument(format!(
                "cpu_warn_pct must be within 0..100, got {}",
                self.policy.cpu_warn_pct
            )));
        }

        Ok(ProcessDescriptor {
            id: self.id,
            metadata: self.metadata,
            executable_path: self.executable_path,
            arguments: self.arguments,
            working_directory: self.working_directory,
            policy: self.policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_minimal() {
        let d = ProcessDescriptor::builder("web", "/bin/sleep").build().unwrap();
        assert_eq!(d.id, "web");
        assert_eq!(d.executable_path, "/bin/sleep");
        assert!(d.policy.auto_restart);
        assert_eq!(d.policy.max_restart_attempts, DEFAULT_MAX_RESTART_ATTEMPTS);
    }

    #[test]
    fn test_builder_fluent() {
        let d = ProcessDescriptor::builder("api", "/usr/bin/api-server")
            .name("API Server")
            .kind("service")
            .version("2.1.0")
            .arg("--port")
            .arg("8080")
            .working_directory("/srv/api")
            .env_var("RUST_LOG", "info")
            .auto_restart(false)
            .restart_delay_ms(250)
            .build()
            .unwrap();

        assert_eq!(d.display_name(), "API Server");
        assert_eq!(d.arguments, vec!["--port", "8080"]);
        assert_eq!(d.working_directory.as_deref(), Some("/srv/api"));
        assert!(!d.policy.auto_restart);
        assert_eq!(d.policy.restart_delay_ms, 250);
    }

    #[test]
    fn test_builder_validates_id() {
        assert!(matches!(
            ProcessDescriptor::builder("", "/bin/true").build(),
            Err(SupervisorError::InvalidArgument(_))
        ));
        assert!(matches!(
            ProcessDescriptor::builder("my app", "/bin/true").build(),
            Err(SupervisorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_builder_validates_executable() {
        assert!(matches!(
            ProcessDescriptor::builder("app", "").build(),
            Err(SupervisorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_builder_validates_policy() {
        let result = ProcessDescriptor::builder("app", "/bin/true")
            .max_restart_attempts(0)
            .build();
        assert!(matches!(result, Err(SupervisorError::InvalidArgument(_))));
    }

    #[test]
    fn test_serde_snapshot_round_trip() {
        let d = ProcessDescriptor::builder("worker", "/usr/bin/worker")
            .arg("--queue")
            .arg("default")
            .env_var("QUEUE_URL", "local")
            .build()
            .unwrap();

        let blob = serde_json::to_string(&d).unwrap();
        let restored: ProcessDescriptor = serde_json::from_str(&blob).unwrap();
        assert_eq!(restored, d);
    }
}
