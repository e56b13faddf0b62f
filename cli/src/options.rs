//! CLI options
//! Every subcommand maps one-to-one onto a daemon command type.

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Control a warden process supervisor")]
pub struct Cli {
    /// Seconds to wait for a daemon response
    #[arg(long, global = true, default_value_t = 5)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Register a process with the supervisor
    Register(ProcessSpec),

    /// Start a registered process
    Start {
        /// Process id
        id: String,
    },

    /// Gracefully stop a process
    Stop {
        /// Process id
        id: String,
    },

    /// Stop then start a process
    Restart {
        /// Process id
        id: String,
    },

    /// Show one process, or all registered processes
    Status {
        /// Process id (omit for all)
        id: Option<String>,
    },

    /// Register (if needed) and start in one step
    Run(ProcessSpec),

    /// Remove a process from the supervisor
    Unregister {
        /// Process id
        id: String,
    },

    /// Show recent stdout/stderr for a process
    Logs {
        /// Process id
        id: String,

        /// Number of lines from the end of each stream
        #[arg(long, default_value_t = 50)]
        lines: usize,
    },

    /// Check the daemon is alive
    Ping,
}

/// Registration details for `register` and `run`
#[derive(Debug, Args)]
pub struct ProcessSpec {
    /// Process id (unique, client-chosen)
    pub id: String,

    /// Executable to launch
    #[arg(long)]
    pub exec: String,

    /// Arguments passed to the executable
    #[arg(long, num_args = 0.., allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Display name
    #[arg(long)]
    pub name: Option<String>,

    /// Working directory for the child
    #[arg(long)]
    pub working_dir: Option<String>,

    /// Environment variables as KEY=VALUE
    #[arg(long = "env", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Restart automatically after a crash
    #[arg(long)]
    pub auto_restart: Option<bool>,

    /// Delay before an automatic restart, in milliseconds
    #[arg(long)]
    pub restart_delay_ms: Option<u64>,

    /// Restart attempts before the cooldown kicks in
    #[arg(long)]
    pub max_restart_attempts: Option<u32>,

    /// CPU warning threshold, percent
    #[arg(long)]
    pub cpu_warn_pct: Option<f64>,

    /// Memory warning threshold, bytes
    #[arg(long)]
    pub mem_warn_bytes: Option<u64>,

    /// Replace an existing registration with the same id
    #[arg(long)]
    pub force: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}
