//! ProcessHandle
//! Wraps one OS child: spawn with captured stdio, line-oriented readers into
//! the ring buffers, graceful-then-forced termination of the process group,
//! and an exit watcher that settles the final status.

use chrono::{DateTime, Utc};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::{NOTIFY_CHANNEL_CAPACITY, OUTPUT_RING_CAPACITY, SUCCESS_EXIT_CODE};
use crate::domain::{OutputRing, ProcessDescriptor, ProcessStatus, Result, SupervisorError};

/// How long a force kill is given to take effect before `stop` returns anyway
const FORCE_KILL_GRACE: Duration = Duration::from_secs(5);

/// What the child is launched with; a projection of the descriptor
#[derive(Debug, Clone)]
struct LaunchSpec {
    executable_path: String,
    arguments: Vec<String>,
    working_directory: Option<String>,
    environment: Vec<(String, String)>,
}

impl LaunchSpec {
    fn from_descriptor(descriptor: &ProcessDescriptor) -> Self {
        Self {
            executable_path: descriptor.executable_path.clone(),
            arguments: descriptor.arguments.clone(),
            working_directory: descriptor.working_directory.clone(),
            environment: descriptor
                .metadata
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Volatile per-process state guarded by the handle mutex
#[derive(Debug, Default)]
struct HandleInner {
    status: ProcessStatus,
    pid: Option<u32>,
    start_time: Option<DateTime<Utc>>,
    stop_time: Option<DateTime<Utc>>,
    restart_count: u32,
    last_error: Option<String>,
    /// Set while an explicit stop is in progress; a signal-terminated child
    /// counts as a clean exit then
    stopping: bool,
}

/// Read-only copy of the handle state
#[derive(Debug, Clone)]
pub struct HandleSnapshot {
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_error: Option<String>,
}

impl HandleSnapshot {
    pub fn uptime_secs(&self) -> Option<i64> {
        if !self.status.is_active() {
            return None;
        }
        self.start_time
            .map(|started| (Utc::now() - started).num_seconds().max(0))
    }
}

/// Live wrapper around one OS child process
pub struct ProcessHandle {
    id: String,
    spec: LaunchSpec,
    inner: StdMutex<HandleInner>,

    stdout_ring: Arc<OutputRing>,
    stderr_ring: Arc<OutputRing>,

    status_tx: broadcast::Sender<ProcessStatus>,
    stdout_tx: broadcast::Sender<String>,
    stderr_tx: broadcast::Sender<String>,

    /// Bumped once per child exit; `stop`/`wait_for_exit` wait on it
    exit_tx: watch::Sender<u64>,

    /// Serializes start/stop/restart on this handle
    op_lock: Mutex<()>,

    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl ProcessHandle {
    pub fn new(descriptor: &ProcessDescriptor) -> Self {
        let (status_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        let (stdout_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        let (stderr_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        let (exit_tx, _) = watch::channel(0);

        Self {
            id: descriptor.id.clone(),
            spec: LaunchSpec::from_descriptor(descriptor),
            inner: StdMutex::new(HandleInner::default()),
            stdout_ring: Arc::new(OutputRing::new(OUTPUT_RING_CAPACITY)),
            stderr_ring: Arc::new(OutputRing::new(OUTPUT_RING_CAPACITY)),
            status_tx,
            stdout_tx,
            stderr_tx,
            exit_tx,
            op_lock: Mutex::new(()),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> ProcessStatus {
        self.inner.lock().unwrap().status
    }

    pub fn snapshot(&self) -> HandleSnapshot {
        let inner = self.inner.lock().unwrap();
        HandleSnapshot {
            status: inner.status,
            pid: inner.pid,
            start_time: inner.start_time,
            stop_time: inner.stop_time,
            restart_count: inner.restart_count,
            last_error: inner.last_error.clone(),
        }
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ProcessStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_stdout(&self) -> broadcast::Receiver<String> {
        self.stdout_tx.subscribe()
    }

    pub fn subscribe_stderr(&self) -> broadcast::Receiver<String> {
        self.stderr_tx.subscribe()
    }

    pub fn stdout_lines(&self, count: usize) -> Vec<String> {
        self.stdout_ring.tail(count)
    }

    pub fn stderr_lines(&self, count: usize) -> Vec<String> {
        self.stderr_ring.tail(count)
    }

    /// Launch the child. Fails with `AlreadyRunning` when a child is alive.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.start_locked().await
    }

    async fn start_locked(self: &Arc<Self>) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.status.is_active() {
                return Err(SupervisorError::AlreadyRunning(self.id.clone()));
            }
            if !inner.status.can_transition_to(ProcessStatus::Starting) {
                return Err(SupervisorError::InvalidStateTransition {
                    from: inner.status.to_string(),
                    to: ProcessStatus::Starting.to_string(),
                });
            }
            inner.status = ProcessStatus::Starting;
            inner.start_time = Some(Utc::now());
            inner.stop_time = None;
            inner.pid = None;
            inner.last_error = None;
            inner.stopping = false;
        }
        let _ = self.status_tx.send(ProcessStatus::Starting);

        debug!(
            process_id = %self.id,
            command = %self.spec.executable_path,
            "Spawning child process"
        );

        let mut command = TokioCommand::new(&self.spec.executable_path);
        command
            .args(&self.spec.arguments)
            .envs(self.spec.environment.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.spec.working_directory {
            command.current_dir(dir);
        }
        // Put the child in its own process group so stop can signal the
        // whole tree
        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = e.to_string();
                {
                    let mut inner = self.inner.lock().unwrap();
                    inner.status = ProcessStatus::Failed;
                    inner.last_error = Some(reason.clone());
                    inner.stop_time = Some(Utc::now());
                }
                let _ = self.status_tx.send(ProcessStatus::Failed);
                warn!(process_id = %self.id, error = %reason, "Spawn failed");
                return Err(SupervisorError::SpawnFailed {
                    id: self.id.clone(),
                    reason,
                });
            }
        };

        let pid = child.id().unwrap_or_default();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.pid = Some(pid);
            inner.status = ProcessStatus::Running;
        }
        let _ = self.status_tx.send(ProcessStatus::Running);
        info!(process_id = %self.id, pid = pid, "Process started");

        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|task| !task.is_finished());
        if let Some(stdout) = child.stdout.take() {
            tasks.push(spawn_line_reader(
                stdout,
                self.stdout_ring.clone(),
                self.stdout_tx.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(spawn_line_reader(
                stderr,
                self.stderr_ring.clone(),
                self.stderr_tx.clone(),
            ));
        }

        let handle = self.clone();
        tasks.push(tokio::spawn(async move {
            handle.watch_exit(child, pid).await;
        }));

        Ok(())
    }

    /// Await the child and settle the terminal status
    async fn watch_exit(self: Arc<Self>, mut child: tokio::process::Child, pid: u32) {
        let outcome = child.wait().await;

        let (status, last_error) = {
            let mut inner = self.inner.lock().unwrap();
            let stopping = inner.stopping;

            let (status, last_error) = match &outcome {
                Ok(exit) => match exit.code() {
                    Some(code) if code == SUCCESS_EXIT_CODE => (ProcessStatus::Stopped, None),
                    Some(code) => (
                        ProcessStatus::Crashed,
                        Some(format!("exited with code {}", code)),
                    ),
                    // Killed by a signal: clean when we asked it to stop
                    None if stopping => (ProcessStatus::Stopped, None),
                    None => (
                        ProcessStatus::Crashed,
                        Some("terminated by signal".to_string()),
                    ),
                },
                Err(e) => (
                    ProcessStatus::Crashed,
                    Some(format!("wait failed: {}", e)),
                ),
            };

            inner.status = status;
            inner.pid = None;
            inner.stop_time = Some(Utc::now());
            inner.last_error = last_error.clone();
            inner.stopping = false;
            (status, last_error)
        };

        match status {
            ProcessStatus::Stopped => {
                info!(process_id = %self.id, pid = pid, "Process exited cleanly")
            }
            _ => {
                warn!(
                    process_id = %self.id,
                    pid = pid,
                    error = last_error.as_deref().unwrap_or("unknown"),
                    "Process crashed"
                )
            }
        }

        let _ = self.status_tx.send(status);
        self.exit_tx.send_modify(|generation| *generation += 1);
    }

    /// Gracefully stop the child, escalating to a forced kill of the process
    /// group after `timeout`. A no-op when no child is alive.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.stop_locked(timeout).await
    }

    async fn stop_locked(&self, timeout: Duration) -> Result<()> {
        let mut exit_rx = self.exit_tx.subscribe();

        let pid = {
            let mut inner = self.inner.lock().unwrap();
            if inner.status.is_terminal() {
                debug!(process_id = %self.id, status = %inner.status, "Stop ignored, no live child");
                return Ok(());
            }
            let pid = match inner.pid {
                Some(pid) => pid,
                None => return Ok(()),
            };
            inner.stopping = true;
            inner.status = ProcessStatus::Stopping;
            pid
        };
        let _ = self.status_tx.send(ProcessStatus::Stopping);

        info!(process_id = %self.id, pid = pid, timeout_secs = timeout.as_secs(), "Stopping process");
        signal_group(pid, TerminationSignal::Graceful);

        if tokio::time::timeout(timeout, exit_rx.changed())
            .await
            .is_ok()
        {
            return Ok(());
        }

        // Graceful stop did not complete; force-kill the whole group.
        warn!(process_id = %self.id, pid = pid, "Graceful stop timed out, force killing");
        signal_group(pid, TerminationSignal::Forced);

        if tokio::time::timeout(FORCE_KILL_GRACE, exit_rx.changed())
            .await
            .is_err()
        {
            warn!(process_id = %self.id, pid = pid, "Child did not exit after force kill");
        }
        Ok(())
    }

    /// Stop then start, counting a successful cycle as one restart
    pub async fn restart(self: &Arc<Self>, timeout: Duration) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.stop_locked(timeout).await?;
        self.start_locked().await?;
        self.inner.lock().unwrap().restart_count += 1;
        Ok(())
    }

    /// Record a restart performed through manager-level stop/start calls
    pub(crate) fn note_restart(&self) {
        self.inner.lock().unwrap().restart_count += 1;
    }

    /// Suspend until the child exits; returns immediately when no child is
    /// alive.
    pub async fn wait_for_exit(&self) {
        let mut exit_rx = self.exit_tx.subscribe();
        if !self.status().is_active() {
            return;
        }
        let _ = exit_rx.changed().await;
    }

    /// Abort the reader/watcher tasks. The child itself is reaped by
    /// `kill_on_drop`.
    pub fn dispose(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Health-driven status flip between Running and Warning
    pub(crate) fn set_warning(&self, warning: bool) {
        let target = if warning {
            ProcessStatus::Warning
        } else {
            ProcessStatus::Running
        };
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.status == target || !inner.status.can_transition_to(target) {
                return;
            }
            inner.status = target;
        }
        let _ = self.status_tx.send(target);
    }
}

enum TerminationSignal {
    Graceful,
    Forced,
}

/// Signal the child's whole process group
#[cfg(unix)]
fn signal_group(pid: u32, signal: TerminationSignal) {
    let signo = match signal {
        TerminationSignal::Graceful => libc::SIGTERM,
        TerminationSignal::Forced => libc::SIGKILL,
    };
    unsafe {
        // Negative pid addresses the process group created at spawn
        if libc::kill(-(pid as i32), signo) != 0 {
            libc::kill(pid as i32, signo);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(pid: u32, signal: TerminationSignal) {
    let mut command = std::process::Command::new("taskkill");
    command.args(["/PID", &pid.to_string(), "/T"]);
    if matches!(signal, TerminationSignal::Forced) {
        command.arg("/F");
    }
    let _ = command.output();
}

fn spawn_line_reader<R>(
    stream: R,
    ring: Arc<OutputRing>,
    tx: broadcast::Sender<String>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            ring.push(line.clone());
            let _ = tx.send(line);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_for(id: &str, exec: &str, args: &[&str]) -> Arc<ProcessHandle> {
        let descriptor = ProcessDescriptor::builder(id, exec)
            .args(args.iter().map(|s| s.to_string()).collect())
            .build()
            .unwrap();
        Arc::new(ProcessHandle::new(&descriptor))
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let handle = handle_for("sleeper", "/bin/sleep", &["30"]);

        handle.start().await.unwrap();
        assert_eq!(handle.status(), ProcessStatus::Running);
        let pid = handle.snapshot().pid.unwrap();
        assert!(pid > 0);

        handle.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(handle.status(), ProcessStatus::Stopped);
        assert!(handle.snapshot().pid.is_none());
        assert!(handle.snapshot().stop_time.is_some());
    }

    #[tokio::test]
    async fn test_start_while_running_fails() {
        let handle = handle_for("dup", "/bin/sleep", &["30"]);
        handle.start().await.unwrap();

        let result = handle.start().await;
        assert!(matches!(result, Err(SupervisorError::AlreadyRunning(_))));

        handle.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_sets_failed() {
        let handle = handle_for("ghost-bin", "/nonexistent/definitely-missing", &[]);

        let result = handle.start().await;
        assert!(matches!(result, Err(SupervisorError::SpawnFailed { .. })));
        assert_eq!(handle.status(), ProcessStatus::Failed);
        assert!(handle.snapshot().last_error.is_some());
    }

    #[tokio::test]
    async fn test_clean_exit_goes_to_stopped() {
        let handle = handle_for("oneshot", "/bin/sh", &["-c", "exit 0"]);
        handle.start().await.unwrap();
        handle.wait_for_exit().await;
        assert_eq!(handle.status(), ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn test_nonzero_exit_goes_to_crashed() {
        let handle = handle_for("crasher", "/bin/sh", &["-c", "exit 3"]);
        handle.start().await.unwrap();
        handle.wait_for_exit().await;

        assert_eq!(handle.status(), ProcessStatus::Crashed);
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.last_error.as_deref(), Some("exited with code 3"));
    }

    #[tokio::test]
    async fn test_stdout_captured_in_ring() {
        let handle = handle_for("echoer", "/bin/sh", &["-c", "echo one; echo two"]);
        let mut stdout_rx = handle.subscribe_stdout();

        handle.start().await.unwrap();
        handle.wait_for_exit().await;

        assert_eq!(stdout_rx.recv().await.unwrap(), "one");
        assert_eq!(stdout_rx.recv().await.unwrap(), "two");

        // Readers may still be draining the pipe after the exit event
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.stdout_lines(10), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_restart_increments_count() {
        let handle = handle_for("restarter", "/bin/sleep", &["30"]);
        handle.start().await.unwrap();
        assert_eq!(handle.snapshot().restart_count, 0);

        handle.restart(Duration::from_secs(5)).await.unwrap();
        assert_eq!(handle.snapshot().restart_count, 1);
        assert_eq!(handle.status(), ProcessStatus::Running);

        handle.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_never_started_is_noop() {
        let handle = handle_for("idle", "/bin/sleep", &["1"]);
        handle.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(handle.status(), ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn test_wait_for_exit_returns_when_already_exited() {
        let handle = handle_for("done", "/bin/sh", &["-c", "exit 0"]);
        handle.start().await.unwrap();
        handle.wait_for_exit().await;
        // Second wait must not hang
        handle.wait_for_exit().await;
    }

    #[tokio::test]
    async fn test_status_events_observed_in_order() {
        let handle = handle_for("observed", "/bin/sh", &["-c", "exit 0"]);
        let mut status_rx = handle.subscribe_status();

        handle.start().await.unwrap();
        handle.wait_for_exit().await;

        assert_eq!(status_rx.recv().await.unwrap(), ProcessStatus::Starting);
        assert_eq!(status_rx.recv().await.unwrap(), ProcessStatus::Running);
        assert_eq!(status_rx.recv().await.unwrap(), ProcessStatus::Stopped);
    }
}
