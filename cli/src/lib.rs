//! warden-cli
//!
//! Thin bus client for the warden daemon: every subcommand publishes one
//! `Command` on the commands topic and renders the matching `Response`.

pub mod client;
pub mod commands;
pub mod formatters;
pub mod options;

pub use client::BusClient;
pub use commands::{build_command, execute, render_response};
pub use options::{Cli, CliCommand};
