//! Output formatting utilities

use chrono::{DateTime, Local, Utc};
use colored::{ColoredString, Colorize};
use std::io::Write;
use tabwriter::TabWriter;

use warden_engine::{ProcessSnapshot, ProcessStatus};

/// Format a timestamp in local time
pub fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "-".to_string(),
    }
}

/// Format a process status with an appropriate color
pub fn format_status(status: ProcessStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        ProcessStatus::Running => text.green(),
        ProcessStatus::Warning => text.yellow(),
        ProcessStatus::Starting | ProcessStatus::Stopping => text.cyan(),
        ProcessStatus::Crashed | ProcessStatus::Failed => text.red(),
        ProcessStatus::Stopped => text.normal(),
    }
}

fn format_uptime(uptime_secs: Option<i64>) -> String {
    match uptime_secs {
        None => "-".to_string(),
        Some(secs) if secs < 60 => format!("{}s", secs),
        Some(secs) if secs < 3600 => format!("{}m{}s", secs / 60, secs % 60),
        Some(secs) => format!("{}h{}m", secs / 3600, (secs % 3600) / 60),
    }
}

/// Render a process table, one row per snapshot
pub fn render_table(snapshots: &[ProcessSnapshot]) -> String {
    let mut tw = TabWriter::new(Vec::new());
    writeln!(tw, "ID\tNAME\tSTATUS\tPID\tUPTIME\tRESTARTS\tSTARTED").unwrap();
    for s in snapshots {
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            s.id,
            s.name,
            format_status(s.status),
            s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            format_uptime(s.uptime_secs),
            s.restart_count,
            format_timestamp(s.start_time),
        )
        .unwrap();
    }
    tw.flush().unwrap();
    String::from_utf8(tw.into_inner().unwrap()).unwrap()
}

/// Render one snapshot in detail
pub fn render_detail(s: &ProcessSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!("Id:       {}\n", s.id));
    out.push_str(&format!("Name:     {}\n", s.name));
    out.push_str(&format!("Status:   {}\n", format_status(s.status)));
    out.push_str(&format!(
        "Pid:      {}\n",
        s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
    ));
    out.push_str(&format!("Uptime:   {}\n", format_uptime(s.uptime_secs)));
    out.push_str(&format!("Restarts: {}\n", s.restart_count));
    out.push_str(&format!("Started:  {}\n", format_timestamp(s.start_time)));
    out.push_str(&format!("Stopped:  {}\n", format_timestamp(s.stop_time)));
    if let Some(warnings) = &s.warnings {
        out.push_str(&format!("Warnings: {}\n", warnings.yellow()));
    }
    if let Some(error) = &s.last_error {
        out.push_str(&format!("Error:    {}\n", error.red()));
    }
    out
}
