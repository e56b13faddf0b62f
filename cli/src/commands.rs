//! Command execution
//! Builds the bus command for each subcommand, sends it, and renders the
//! response. Exit code 0 on success, 1 otherwise.

use colored::Colorize;

use warden_engine::{Command, ProcessSnapshot, Response};

use crate::client::BusClient;
use crate::formatters::{render_detail, render_table};
use crate::options::{CliCommand, ProcessSpec};

/// Map a subcommand onto its wire command
pub fn build_command(cli_command: &CliCommand) -> Command {
    match cli_command {
        CliCommand::Register(spec) => apply_spec(Command::new("register"), spec),
        CliCommand::Run(spec) => apply_spec(Command::new("run"), spec),
        CliCommand::Start { id } => Command::new("start").with_parameter("processId", id.as_str()),
        CliCommand::Stop { id } => Command::new("stop").with_parameter("processId", id.as_str()),
        CliCommand::Restart { id } => Command::new("restart").with_parameter("processId", id.as_str()),
        CliCommand::Unregister { id } => {
            Command::new("unregister").with_parameter("processId", id.as_str())
        }
        CliCommand::Status { id } => match id {
            Some(id) => Command::new("status").with_parameter("processId", id.as_str()),
            None => Command::new("status"),
        },
        CliCommand::Logs { id, lines } => Command::new("logs")
            .with_parameter("processId", id.as_str())
            .with_parameter("lines", lines.to_string()),
        CliCommand::Ping => Command::new("ping"),
    }
}

fn apply_spec(command: Command, spec: &ProcessSpec) -> Command {
    let mut command = command
        .with_parameter("processId", spec.id.as_str())
        .with_parameter("executablePath", spec.exec.as_str());

    if !spec.args.is_empty() {
        command = command.with_parameter("arguments", spec.args.join(" "));
    }
    if let Some(name) = &spec.name {
        command = command.with_parameter("name", name.as_str());
    }
    if let Some(dir) = &spec.working_dir {
        command = command.with_parameter("workingDirectory", dir.as_str());
    }
    if !spec.env.is_empty() {
        let env: serde_json::Map<String, serde_json::Value> = spec
            .env
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        command = command.with_parameter(
            "environment",
            serde_json::Value::Object(env).to_string(),
        );
    }
    if let Some(auto_restart) = spec.auto_restart {
        command = command.with_parameter("autoRestart", auto_restart.to_string());
    }
    if let Some(delay) = spec.restart_delay_ms {
        command = command.with_parameter("restartDelayMs", delay.to_string());
    }
    if let Some(attempts) = spec.max_restart_attempts {
        command = command.with_parameter("maxRestartAttempts", attempts.to_string());
    }
    if let Some(cpu) = spec.cpu_warn_pct {
        command = command.with_parameter("cpuWarnPct", cpu.to_string());
    }
    if let Some(mem) = spec.mem_warn_bytes {
        command = command.with_parameter("memWarnBytes", mem.to_string());
    }
    if spec.force {
        command = command.with_parameter("force", "true");
    }
    command
}

/// Render a response for the subcommand that produced it
pub fn render_response(cli_command: &CliCommand, response: &Response) -> String {
    if !response.success {
        let error = response.error.as_deref().unwrap_or("unknown error");
        return format!("{} {}", "error:".red(), error);
    }

    match cli_command {
        CliCommand::Status { id: None } => {
            let snapshots: Vec<ProcessSnapshot> = response
                .data
                .clone()
                .and_then(|data| serde_json::from_value(data).ok())
                .unwrap_or_default();
            if snapshots.is_empty() {
                "no processes registered".to_string()
            } else {
                render_table(&snapshots)
            }
        }
        CliCommand::Status { id: Some(_) }
        | CliCommand::Register(_)
        | CliCommand::Run(_)
        | CliCommand::Start { .. }
        | CliCommand::Stop { .. }
        | CliCommand::Restart { .. } => match snapshot_from(response) {
            Some(snapshot) => render_detail(&snapshot),
            None => "ok".to_string(),
        },
        CliCommand::Logs { .. } => {
            let mut out = String::new();
            if let Some(data) = &response.data {
                for (label, key) in [("stdout", "stdout"), ("stderr", "stderr")] {
                    if let Some(lines) = data.get(key).and_then(|v| v.as_array()) {
                        if !lines.is_empty() {
                            out.push_str(&format!("--- {}\n", label));
                            for line in lines {
                                out.push_str(line.as_str().unwrap_or(""));
                                out.push('\n');
                            }
                        }
                    }
                }
            }
            if out.is_empty() {
                "no output captured".to_string()
            } else {
                out
            }
        }
        CliCommand::Unregister { id } => format!("unregistered {}", id),
        CliCommand::Ping => match &response.data {
            Some(data) => format!(
                "daemon alive, version {}",
                data.get("version").and_then(|v| v.as_str()).unwrap_or("?")
            ),
            None => "daemon alive".to_string(),
        },
    }
}

fn snapshot_from(response: &Response) -> Option<ProcessSnapshot> {
    serde_json::from_value(response.data.clone()?).ok()
}

/// Send a command and print its rendered response; returns the process exit
/// code.
pub async fn execute(client: &BusClient, cli_command: &CliCommand) -> i32 {
    let command = build_command(cli_command);
    match client.send(command).await {
        Ok(response) => {
            println!("{}", render_response(cli_command, &response));
            if response.success {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_start_command() {
        let command = build_command(&CliCommand::Start {
            id: "web".to_string(),
        });
        assert_eq!(command.command_type, "start");
        assert_eq!(command.parameter("processId"), Some("web"));
    }

    #[test]
    fn test_build_register_command_carries_spec() {
        let spec = ProcessSpec {
            id: "web".to_string(),
            exec: "/bin/sleep".to_string(),
            args: vec!["3600".to_string()],
            name: Some("Web".to_string()),
            working_dir: None,
            env: vec![("PORT".to_string(), "8080".to_string())],
            auto_restart: Some(false),
            restart_delay_ms: Some(100),
            max_restart_attempts: None,
            cpu_warn_pct: None,
            mem_warn_bytes: None,
            force: true,
        };
        let command = build_command(&CliCommand::Register(spec));
        assert_eq!(command.command_type, "register");
        assert_eq!(command.parameter("executablePath"), Some("/bin/sleep"));
        assert_eq!(command.parameter("arguments"), Some("3600"));
        assert_eq!(command.parameter("autoRestart"), Some("false"));
        assert_eq!(command.parameter("force"), Some("true"));
        assert_eq!(command.parameter("environment"), Some(r#"{"PORT":"8080"}"#));
    }

    #[test]
    fn test_render_failure() {
        colored::control::set_override(false);
        let response = Response::failure("x", "Process 'web' not found");
        let rendered = render_response(
            &CliCommand::Start {
                id: "web".to_string(),
            },
            &response,
        );
        assert!(rendered.contains("not found"));
    }

    #[test]
    fn test_render_ping() {
        colored::control::set_override(false);
        let response = Response::ok(
            "x",
            Some(serde_json::json!({ "status": "running", "version": "0.1.0" })),
        );
        let rendered = render_response(&CliCommand::Ping, &response);
        assert!(rendered.contains("0.1.0"));
    }
}
