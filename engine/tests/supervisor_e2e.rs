//! End-to-end supervisor scenarios
//! Drives a full supervisor over the in-process bus with real child
//! processes, the way an external client would.

use std::sync::Arc;
use std::time::Duration;

use warden_engine::domain::ports::{topics, Bus, BusExt};
use warden_engine::infrastructure::{InMemoryBus, SqliteStore, SysinfoSampler};
use warden_engine::{
    Command, Event, EventType, ProcessStatus, Response, ServiceContext, Supervisor,
    SupervisorConfig,
};

struct TestDaemon {
    supervisor: Supervisor,
    bus: Arc<InMemoryBus>,
}

impl TestDaemon {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(tune: impl FnOnce(&mut SupervisorConfig)) -> Self {
        let mut config = SupervisorConfig::default();
        config.tick_interval_secs = 1;
        config.shutdown_timeout_secs = 5;
        config.health.check_interval_secs = 1;
        tune(&mut config);

        let bus = Arc::new(InMemoryBus::new());
        let supervisor = Supervisor::new(ServiceContext {
            bus: bus.clone(),
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
            sampler: Arc::new(SysinfoSampler::new()),
            config,
        });
        supervisor.start().await.unwrap();

        Self { supervisor, bus }
    }

    /// Publish a command and await its response, the way a client would
    async fn send(&self, command: Command) -> Response {
        let mut responses = self
            .bus
            .subscribe(command.response_channel())
            .await
            .unwrap();
        self.bus
            .publish_json(topics::COMMANDS, &command)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let envelope = responses.recv().await.expect("bus closed");
                let response: Response = envelope.decode().unwrap();
                if response.command_id == command.command_id {
                    return response;
                }
            }
        })
        .await
        .expect("no response within 5s")
    }

    async fn register_sleeper(&self, id: &str) {
        let response = self
            .send(
                Command::new("register")
                    .with_parameter("processId", id)
                    .with_parameter("executablePath", "/bin/sleep")
                    .with_parameter("arguments", "3600"),
            )
            .await;
        assert!(response.success, "register failed: {:?}", response.error);
    }

    async fn stop(self) {
        self.supervisor.shutdown().await;
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, deadline: Duration, check: F) {
    let end = tokio::time::Instant::now() + deadline;
    while !check() {
        assert!(tokio::time::Instant::now() < end, "timed out waiting: {}", what);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

// Scenario: register + start over the bus, observe success response and
// persisted running status.
#[tokio::test]
async fn test_register_and_start_via_commands() {
    let daemon = TestDaemon::start().await;
    daemon.register_sleeper("web").await;

    let response = daemon
        .send(Command::new("start").with_parameter("processId", "web"))
        .await;
    assert!(response.success, "start failed: {:?}", response.error);

    let snapshot = daemon.supervisor.manager().get("web").unwrap();
    assert_eq!(snapshot.status, ProcessStatus::Running);
    assert!(snapshot.pid.is_some());

    assert_eq!(
        daemon.supervisor.state().get_status("web").await.unwrap(),
        ProcessStatus::Running
    );

    daemon.stop().await;
}

// Scenario: graceful stop leaves no child alive and records the stop time.
#[tokio::test]
async fn test_stop_via_commands() {
    let daemon = TestDaemon::start().await;
    daemon.register_sleeper("web").await;
    daemon
        .send(Command::new("start").with_parameter("processId", "web"))
        .await;
    let pid = daemon.supervisor.manager().get("web").unwrap().pid.unwrap();

    let response = daemon
        .send(Command::new("stop").with_parameter("processId", "web"))
        .await;
    assert!(response.success);

    let snapshot = daemon.supervisor.manager().get("web").unwrap();
    assert_eq!(snapshot.status, ProcessStatus::Stopped);
    assert!(snapshot.stop_time.is_some());
    assert_eq!(
        daemon.supervisor.state().get_status("web").await.unwrap(),
        ProcessStatus::Stopped
    );

    // The OS child is gone (kill(pid, 0) fails once reaped)
    #[cfg(unix)]
    {
        // Give the kernel a moment to reap
        tokio::time::sleep(Duration::from_millis(100)).await;
        let alive = unsafe { libc::kill(pid as i32, 0) == 0 };
        assert!(!alive, "child {} still alive after stop", pid);
    }

    daemon.stop().await;
}

// Scenario: a crashing child is detected, announced on the events topic, and
// restarted per policy with restart_count == 1.
#[tokio::test]
async fn test_crash_detection_and_auto_restart() {
    let daemon = TestDaemon::start().await;
    let mut events = daemon.bus.subscribe(topics::EVENTS).await.unwrap();

    let descriptor = warden_engine::ProcessDescriptor::builder("flaky", "/bin/sh")
        .args(vec!["-c".into(), "sleep 0.3; exit 1".into()])
        .restart_delay_ms(100)
        .build()
        .unwrap();
    daemon
        .supervisor
        .manager()
        .register(descriptor, false)
        .await
        .unwrap();

    daemon
        .send(Command::new("start").with_parameter("processId", "flaky"))
        .await;

    // Crash event appears on the bus
    let crashed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event: Event = events.recv().await.unwrap().decode().unwrap();
            if event.event_type == EventType::ProcessCrashed
                && event.process_id.as_deref() == Some("flaky")
            {
                return event;
            }
        }
    })
    .await
    .expect("no crash event");
    assert_eq!(crashed.process_id.as_deref(), Some("flaky"));

    // And the policy brings it back
    let manager = daemon.supervisor.manager();
    wait_until("auto restart", Duration::from_secs(5), || {
        manager
            .get("flaky")
            .map(|s| s.restart_count >= 1 && s.status.is_running())
            .unwrap_or(false)
    })
    .await;

    daemon.stop().await;
}

// Scenario: tight thresholds produce health.warning events and health topic
// traffic for a trivially-exceeding process.
#[tokio::test]
async fn test_health_warning_flow() {
    let daemon = TestDaemon::start().await;
    let mut events = daemon.bus.subscribe(topics::EVENTS).await.unwrap();
    let mut health = daemon.bus.subscribe("health:*").await.unwrap();

    let descriptor = warden_engine::ProcessDescriptor::builder("hog", "/bin/sleep")
        .arg("3600")
        .policy(warden_engine::RestartPolicy {
            auto_restart: false,
            cpu_warn_pct: 0.0, // cpu threshold disabled; memory carries the test
            mem_warn_bytes: 1,
            ..warden_engine::RestartPolicy::default()
        })
        .build()
        .unwrap();
    daemon
        .supervisor
        .manager()
        .register(descriptor, false)
        .await
        .unwrap();
    daemon
        .send(Command::new("start").with_parameter("processId", "hog"))
        .await;

    let warning = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event: Event = events.recv().await.unwrap().decode().unwrap();
            if event.event_type == EventType::HealthWarning {
                return event;
            }
        }
    })
    .await
    .expect("no health.warning event");
    assert_eq!(warning.process_id.as_deref(), Some("hog"));

    let payload = tokio::time::timeout(Duration::from_secs(10), health.recv())
        .await
        .expect("no health payload")
        .unwrap();
    assert_eq!(payload.topic, "health:hog");
    assert_eq!(payload.payload["process_id"], "hog");

    // Status reflects the warning and the snapshot carries the text
    let manager = daemon.supervisor.manager();
    wait_until("warning status", Duration::from_secs(5), || {
        manager
            .get("hog")
            .map(|s| s.status == ProcessStatus::Warning && s.warnings.is_some())
            .unwrap_or(false)
    })
    .await;

    daemon.stop().await;
}

// Scenario: status without a processId lists every registered process.
#[tokio::test]
async fn test_status_lists_all_processes() {
    let daemon = TestDaemon::start().await;
    daemon.register_sleeper("one").await;
    daemon.register_sleeper("two").await;
    daemon
        .send(Command::new("start").with_parameter("processId", "one"))
        .await;

    let response = daemon.send(Command::new("status")).await;
    assert!(response.success);

    let list = response.data.unwrap();
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 2);

    let by_id = |id: &str| {
        list.iter()
            .find(|v| v["id"] == id)
            .unwrap_or_else(|| panic!("{} missing from status", id))
            .clone()
    };
    assert_eq!(by_id("one")["status"], "running");
    assert_eq!(by_id("two")["status"], "stopped");

    daemon.stop().await;
}

// Scenario: ping answers within the deadline with the daemon version.
#[tokio::test]
async fn test_ping() {
    let daemon = TestDaemon::start().await;

    let started = tokio::time::Instant::now();
    let response = daemon.send(Command::new("ping")).await;
    assert!(started.elapsed() < Duration::from_secs(1));

    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(data["status"], "running");
    assert_eq!(data["version"], env!("CARGO_PKG_VERSION"));

    daemon.stop().await;
}

// run = register-if-absent + start in one command.
#[tokio::test]
async fn test_run_command() {
    let daemon = TestDaemon::start().await;

    let response = daemon
        .send(
            Command::new("run")
                .with_parameter("processId", "adhoc")
                .with_parameter("executablePath", "/bin/sleep")
                .with_parameter("arguments", "3600"),
        )
        .await;
    assert!(response.success, "run failed: {:?}", response.error);
    assert_eq!(response.data.unwrap()["status"], "running");

    // Running it again is a plain start no-op, not a duplicate registration
    let response = daemon
        .send(
            Command::new("run")
                .with_parameter("processId", "adhoc")
                .with_parameter("executablePath", "/bin/sleep"),
        )
        .await;
    assert!(response.success);

    daemon.stop().await;
}

// Unknown targets surface as failure responses, and the dispatcher survives.
#[tokio::test]
async fn test_unknown_process_and_unknown_command() {
    let daemon = TestDaemon::start().await;

    let response = daemon
        .send(Command::new("start").with_parameter("processId", "nope"))
        .await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("not found"));

    let response = daemon.send(Command::new("frobnicate")).await;
    assert!(!response.success);

    let response = daemon.send(Command::new("ping")).await;
    assert!(response.success);

    daemon.stop().await;
}

// logs returns the ring contents over the bus.
#[tokio::test]
async fn test_logs_command() {
    let daemon = TestDaemon::start().await;

    let descriptor = warden_engine::ProcessDescriptor::builder("talker", "/bin/sh")
        .args(vec!["-c".into(), "echo hello; echo world >&2".into()])
        .auto_restart(false)
        .build()
        .unwrap();
    daemon
        .supervisor
        .manager()
        .register(descriptor, false)
        .await
        .unwrap();
    daemon
        .send(Command::new("start").with_parameter("processId", "talker"))
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let response = daemon
        .send(Command::new("logs").with_parameter("processId", "talker"))
        .await;
    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(data["stdout"][0], "hello");
    assert_eq!(data["stderr"][0], "world");

    daemon.stop().await;
}

// unregister removes the process from registry and storage.
#[tokio::test]
async fn test_unregister_command() {
    let daemon = TestDaemon::start().await;
    daemon.register_sleeper("temp").await;

    let response = daemon
        .send(Command::new("unregister").with_parameter("processId", "temp"))
        .await;
    assert!(response.success);

    assert!(daemon.supervisor.manager().get("temp").is_none());
    assert!(daemon.supervisor.state().get_status("temp").await.is_err());

    let response = daemon
        .send(Command::new("status").with_parameter("processId", "temp"))
        .await;
    assert!(!response.success);

    daemon.stop().await;
}

// Registry contents survive a daemon restart via the state store.
#[tokio::test]
async fn test_state_survives_daemon_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("warden.db");

    let mut config = SupervisorConfig::default();
    config.tick_interval_secs = 1;
    config.shutdown_timeout_secs = 5;

    let descriptor = warden_engine::ProcessDescriptor::builder("persistent", "/bin/sleep")
        .arg("3600")
        .build()
        .unwrap();

    // Simulate a daemon that died while the process was running: the row is
    // persisted with a non-stopped status and nobody wrote a terminal state
    {
        let state = warden_engine::supervisor::StateManager::new(Arc::new(
            SqliteStore::open(&db_path).unwrap(),
        ));
        state.initialize().await.unwrap();
        state
            .save_process(&descriptor, ProcessStatus::Running)
            .await
            .unwrap();
    }

    // Next daemon lifetime: the descriptor is recovered into the registry,
    // materialized as stopped, not started
    let supervisor = Supervisor::new(ServiceContext {
        bus: Arc::new(InMemoryBus::new()),
        store: Arc::new(SqliteStore::open(&db_path).unwrap()),
        sampler: Arc::new(SysinfoSampler::new()),
        config,
    });
    supervisor.start().await.unwrap();

    let snapshot = supervisor.manager().get("persistent").expect("recovered");
    assert_eq!(snapshot.status, ProcessStatus::Stopped);
    assert_eq!(
        supervisor.state().get_status("persistent").await.unwrap(),
        ProcessStatus::Stopped
    );
    supervisor.shutdown().await;
}
