//! Daemon configuration
//! One structured config object, loadable from a YAML file, with the two
//! environment overrides the daemon honors: the install root and the
//! environment selector.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::domain::ports::topics;
use crate::domain::{Result, SupervisorError};
use crate::supervisor::{HealthConfig, ManagerConfig};

/// Environment variable naming the install root
pub const INSTALL_ROOT_ENV: &str = "WARDEN_INSTALL_ROOT";

/// Environment variable selecting the runtime environment
pub const ENVIRONMENT_ENV: &str = "WARDEN_ENVIRONMENT";

fn default_environment() -> String {
    "production".to_string()
}

fn default_install_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_command_topic() -> String {
    topics::COMMANDS.to_string()
}

fn default_response_topic() -> String {
    topics::RESPONSES.to_string()
}

fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}

fn default_shutdown_timeout_secs() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

fn default_max_start_attempts() -> u32 {
    DEFAULT_MAX_START_ATTEMPTS
}

fn default_auto_restart() -> bool {
    true
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthSettings {
    pub check_interval_secs: u64,
    pub cpu_warn_pct: f64,
    pub mem_warn_bytes: u64,
    pub max_restart_attempts: u32,
    pub restart_cooldown_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            cpu_warn_pct: DEFAULT_CPU_WARN_PCT,
            mem_warn_bytes: DEFAULT_MEM_WARN_BYTES,
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            restart_cooldown_secs: DEFAULT_RESTART_COOLDOWN_SECS,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseSettings {
    /// "sqlite" or "memory"
    pub kind: String,
    /// File path for sqlite; defaults to `<install_root>/data/warden.db`
    pub path: Option<PathBuf>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            kind: "sqlite".to_string(),
            path: None,
        }
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    pub install_root: PathBuf,
    pub environment: String,

    pub command_topic: String,
    pub response_topic: String,

    pub tick_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub max_start_attempts: u32,
    pub max_restart_attempts: u32,

    /// Default for registrations that do not specify auto restart
    pub auto_restart: bool,

    pub health: HealthSettings,
    pub database: DatabaseSettings,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            environment: default_environment(),
            command_topic: default_command_topic(),
            response_topic: default_response_topic(),
            tick_interval_secs: default_tick_interval_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_start_attempts: default_max_start_attempts(),
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            auto_restart: default_auto_restart(),
            health: HealthSettings::default(),
            database: DatabaseSettings::default(),
        }
    }
}

impl SupervisorConfig {
    /// Load from a YAML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SupervisorError::InvalidArgument(format!(
                "cannot read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut config: SupervisorConfig = serde_yaml::from_str(&raw).map_err(|e| {
            SupervisorError::InvalidArgument(format!("invalid config file: {}", e))
        })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var(INSTALL_ROOT_ENV) {
            if !root.is_empty() {
                self.install_root = PathBuf::from(root);
            }
        }
        if let Ok(environment) = std::env::var(ENVIRONMENT_ENV) {
            if !environment.is_empty() {
                self.environment = environment;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.health.cpu_warn_pct) {
            return Err(SupervisorError::InvalidArgument(format!(
                "health.cpu_warn_pct must be within 0..100, got {}",
                self.health.cpu_warn_pct
            )));
        }
        if self.health.max_restart_attempts < 1 {
            return Err(SupervisorError::InvalidArgument(
                "health.max_restart_attempts must be at least 1".into(),
            ));
        }
        if self.max_start_attempts < 1 {
            return Err(SupervisorError::InvalidArgument(
                "max_start_attempts must be at least 1".into(),
            ));
        }
        match self.database.kind.as_str() {
            "sqlite" | "memory" => Ok(()),
            other => Err(SupervisorError::InvalidArgument(format!(
                "unsupported database kind '{}'",
                other
            ))),
        }
    }

    // Directory layout under the install root

    pub fn data_dir(&self) -> PathBuf {
        self.install_root.join("data")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.install_root.join("logs")
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.install_root.join("apps")
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("warden.db"))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            check_interval: Duration::from_secs(self.health.check_interval_secs),
            cpu_warn_pct: self.health.cpu_warn_pct,
            mem_warn_bytes: self.health.mem_warn_bytes,
            max_restart_attempts: self.health.max_restart_attempts,
            restart_cooldown: Duration::from_secs(self.health.restart_cooldown_secs),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            max_start_attempts: self.max_start_attempts,
            shutdown_timeout: self.shutdown_timeout(),
            auto_restart_default: self.auto_restart,
        }
    }
}
