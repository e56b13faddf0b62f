//! Sysinfo resource sampler
//! CPU and memory come from `sysinfo`; thread and file-handle counts come
//! from `/proc` on Linux and report zero elsewhere.

use std::sync::Mutex;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tracing::trace;

use crate::domain::ports::ResourceSampler;
use crate::domain::{round_cpu_pct, ResourceSnapshot};

/// `sysinfo`-backed resource sampler
pub struct SysinfoSampler {
    system: Mutex<System>,
    core_count: usize,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let core_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            system: Mutex::new(System::new()),
            core_count,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self, pid: u32) -> Option<ResourceSnapshot> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap();

        if !system.refresh_process(sys_pid) {
            trace!(pid = pid, "Process not observable for sampling");
            return None;
        }

        let process = system.process(sys_pid)?;

        // cpu_usage() is a percentage of a single core; normalize to the
        // whole machine and round to two decimals
        let cpu_pct = round_cpu_pct(f64::from(process.cpu_usage()) / self.core_count as f64);
        let memory_bytes = process.memory();

        Some(ResourceSnapshot {
            cpu_pct,
            memory_bytes,
            thread_count: read_thread_count(pid),
            handle_count: read_handle_count(pid),
        })
    }
}

#[cfg(target_os = "linux")]
fn read_thread_count(pid: u32) -> u32 {
    std::fs::read_to_string(format!("/proc/{}/status", pid))
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find(|line| line.starts_with("Threads:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|count| count.parse().ok())
        })
        .unwrap_or(0)
}

#[cfg(target_os = "linux")]
fn read_handle_count(pid: u32) -> u32 {
    std::fs::read_dir(format!("/proc/{}/fd", pid))
        .map(|entries| entries.count() as u32)
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn read_thread_count(_pid: u32) -> u32 {
    0
}

#[cfg(not(target_os = "linux"))]
fn read_handle_count(_pid: u32) -> u32 {
    0
}
