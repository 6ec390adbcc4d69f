// tests/supervisor_process.rs
//
// Real-process tests: the worker is a `/bin/sh` script in a temp dir.

#![cfg(unix)]

mod common;
use crate::common::{assert_in_order, eventually, init_tracing, with_timeout};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use relayvisor::errors::RelayError;
use relayvisor::exec::{ExitNotice, HaltRequest, KeepAlive, NoKeepAlive, ProcessSupervisor};
use relayvisor::fs::RealFileSystem;
use relayvisor::resolver::BinaryResolver;
use relayvisor::stream::LogStream;
use relayvisor::types::{ExitPolicy, SupervisorPhase};
use relayvisor_test_utils::{ConfigBuilder, WorkerFixture};

const LONG_RUNNING: &str = r#"echo "worker up: $*"
exec sleep 30"#;

fn build(
    config: ConfigBuilder,
    keepalive: Box<dyn KeepAlive>,
) -> (Arc<ProcessSupervisor>, mpsc::UnboundedReceiver<HaltRequest>) {
    let cfg = config.build();
    let resolver = BinaryResolver::new(cfg.candidate_layout(), Arc::new(RealFileSystem));
    let (supervisor, halts) = ProcessSupervisor::new(
        resolver,
        LogStream::new(500),
        cfg.supervisor_options(),
        keepalive,
    )
    .unwrap();
    (Arc::new(supervisor), halts)
}

fn lines(supervisor: &ProcessSupervisor) -> Vec<String> {
    supervisor
        .logs()
        .snapshot()
        .iter()
        .map(|l| l.to_string())
        .collect()
}

fn count(lines: &[String], needle: &str) -> usize {
    lines.iter().filter(|l| l.contains(needle)).count()
}

#[tokio::test]
async fn start_streams_output_and_stop_is_solicited() {
    init_tracing();
    let fixture = WorkerFixture::new();
    let path = fixture.install_primary(LONG_RUNNING);
    let (supervisor, mut halts) = build(fixture.config(), Box::new(NoKeepAlive));

    supervisor.start("-server example.com:19132").await.unwrap();
    assert!(supervisor.is_running());
    eventually(|| count(&lines(&supervisor), "worker up: -server example.com:19132") == 1).await;

    with_timeout(supervisor.stop()).await;

    assert!(!supervisor.is_running());
    assert_eq!(supervisor.current_phase(), SupervisorPhase::Idle);
    assert_in_order(
        &lines(&supervisor),
        &[
            "Starting Phantom process...",
            &format!("Command: {} -server example.com:19132", path.display()),
            "Phantom process started successfully (PID: ",
            "worker up:",
            "Stopping Phantom process...",
            "Phantom process exited with code: unknown (signal 15).",
            "Phantom process stopped.",
        ],
    );
    assert!(halts.try_recv().is_err(), "a requested stop must not halt");
}

#[tokio::test]
async fn stop_without_worker_is_a_noop() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary(LONG_RUNNING);
    let (supervisor, _halts) = build(fixture.config(), Box::new(NoKeepAlive));

    supervisor.stop().await;
    supervisor.stop().await;

    let lines = lines(&supervisor);
    assert_eq!(count(&lines, "stopped"), 0, "{lines:#?}");
    assert_eq!(count(&lines, "Stopping"), 0, "{lines:#?}");
    assert!(!supervisor.is_running());
}

#[tokio::test]
async fn second_start_replaces_the_first() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary(LONG_RUNNING);
    let (supervisor, mut halts) = build(fixture.config(), Box::new(NoKeepAlive));

    supervisor.start("-server a:1").await.unwrap();
    let first = supervisor.active_child().await.unwrap();
    supervisor.start("-server b:2").await.unwrap();
    let second = supervisor.active_child().await.unwrap();

    assert_eq!(second.arguments, vec!["-server", "b:2"]);
    assert_ne!(first.pid, second.pid);
    assert!(supervisor.is_running());
    assert_eq!(
        count(&lines(&supervisor), "Phantom process already running. Restarting..."),
        1
    );
    assert!(halts.try_recv().is_err(), "a replaced worker must not halt");

    supervisor.stop().await;
}

#[tokio::test]
async fn concurrent_starts_leave_exactly_one_worker() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary(LONG_RUNNING);
    let (supervisor, _halts) = build(fixture.config(), Box::new(NoKeepAlive));

    let mut tasks = Vec::new();
    for i in 0..4 {
        let supervisor = Arc::clone(&supervisor);
        tasks.push(tokio::spawn(async move {
            supervisor.start(&format!("-server host:{}", 1000 + i)).await
        }));
    }
    for task in tasks {
        with_timeout(task).await.unwrap().unwrap();
    }

    let started = count(&lines(&supervisor), "Phantom process started successfully");
    let stopped = count(&lines(&supervisor), "Phantom process stopped.");
    assert_eq!(started, 4);
    assert_eq!(stopped, 3);
    assert!(supervisor.active_child().await.is_some());

    with_timeout(supervisor.stop()).await;
    assert!(supervisor.active_child().await.is_none());
    assert!(!supervisor.is_running());
}

#[tokio::test]
async fn start_and_stop_race_settles() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary(LONG_RUNNING);
    let (supervisor, _halts) = build(fixture.config(), Box::new(NoKeepAlive));

    for _ in 0..5 {
        // The slot lock is FIFO, so the start is taken before the stop.
        let (started, ()) = with_timeout(async {
            tokio::join!(supervisor.start("-server a:1"), supervisor.stop())
        })
        .await;
        started.unwrap();

        assert!(!supervisor.is_running());
        assert!(supervisor.active_child().await.is_none());
        assert_eq!(supervisor.current_phase(), SupervisorPhase::Idle);
    }

    for _ in 0..5 {
        supervisor.start("-server a:1").await.unwrap();
        with_timeout(supervisor.stop()).await;

        assert!(!supervisor.is_running());
        assert!(supervisor.active_child().await.is_none());
    }
}

#[tokio::test]
async fn unsolicited_exit_reports_code_and_halts() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary("echo \"last words\"\nexit 1");
    let (supervisor, mut halts) = build(fixture.config(), Box::new(NoKeepAlive));

    supervisor.start("-server a:1").await.unwrap();

    let halt = with_timeout(halts.recv()).await;
    assert_eq!(halt, Some(HaltRequest::UnsolicitedExit { code: Some(1) }));
    assert!(!supervisor.is_running());
    assert_in_order(
        &lines(&supervisor),
        &[
            "last words",
            "Phantom process exited with code: 1.",
            "Process stopped unexpectedly. Stopping service.",
        ],
    );
    assert_eq!(count(&lines(&supervisor), "Phantom process stopped."), 0);
}

#[tokio::test]
async fn idle_policy_keeps_the_supervisor_usable() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary("exit 3");
    let (supervisor, mut halts) = build(
        fixture.config().exit_policy(ExitPolicy::Idle),
        Box::new(NoKeepAlive),
    );

    supervisor.start("-server a:1").await.unwrap();
    eventually(|| count(&lines(&supervisor), "Waiting for a new start command.") == 1).await;

    assert!(halts.try_recv().is_err());
    assert_eq!(supervisor.current_phase(), SupervisorPhase::Idle);
    assert!(count(&lines(&supervisor), "exited with code: 3.") == 1);

    supervisor.start("-server a:1").await.unwrap();
    eventually(|| count(&lines(&supervisor), "exited with code: 3.") == 2).await;
}

#[tokio::test]
async fn missing_binary_is_reported_not_retried() {
    init_tracing();
    let fixture = WorkerFixture::new();
    let (supervisor, _halts) = build(fixture.config(), Box::new(NoKeepAlive));

    let err = supervisor.start("-server a:1").await.unwrap_err();

    assert!(matches!(err, RelayError::BinaryNotFound { .. }));
    assert!(!supervisor.is_running());
    assert_eq!(supervisor.current_phase(), SupervisorPhase::Idle);
    let lines = lines(&supervisor);
    assert_eq!(count(&lines, "Error: Failed to get binary file:"), 1);
    assert_eq!(count(&lines, "Starting Phantom process..."), 0);
}

#[tokio::test]
async fn non_executable_abi_binary_is_fixed_and_run() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_abi("arm64-v8a", LONG_RUNNING, 0o644);
    let (supervisor, _halts) = build(
        fixture.config().abis(&["arm64-v8a", "armeabi-v7a"]),
        Box::new(NoKeepAlive),
    );

    supervisor.start("-server a:1").await.unwrap();
    eventually(|| count(&lines(&supervisor), "worker up:") == 1).await;

    with_timeout(supervisor.stop()).await;
}

#[tokio::test]
async fn stubborn_worker_is_killed_after_grace() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary("trap '' TERM\necho ignoring\nwhile true; do sleep 0.1; done");
    let (supervisor, _halts) = build(
        fixture.config().graceful_timeout_ms(300),
        Box::new(NoKeepAlive),
    );

    supervisor.start("-server a:1").await.unwrap();
    eventually(|| count(&lines(&supervisor), "ignoring") == 1).await;

    with_timeout(supervisor.stop()).await;

    assert!(!supervisor.is_running());
    let lines = lines(&supervisor);
    assert_eq!(count(&lines, "exited with code: unknown (signal 9)."), 1, "{lines:#?}");
    assert_eq!(count(&lines, "Phantom process stopped."), 1);
}

#[derive(Default)]
struct CountingKeepAlive {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl KeepAlive for CountingKeepAlive {
    fn acquire(&self) -> anyhow::Result<()> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn keepalive_is_held_for_the_session_and_released_once() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary(LONG_RUNNING);
    let keepalive = CountingKeepAlive::default();
    let acquired = Arc::clone(&keepalive.acquired);
    let released = Arc::clone(&keepalive.released);
    let (supervisor, _halts) = build(fixture.config(), Box::new(keepalive));

    assert_eq!(acquired.load(Ordering::SeqCst), 1);

    supervisor.start("-server a:1").await.unwrap();
    supervisor.stop().await;
    supervisor.start("-server a:1").await.unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 0);

    with_timeout(supervisor.shutdown()).await;
    with_timeout(supervisor.shutdown()).await;
    drop(supervisor);

    assert_eq!(acquired.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn start_after_shutdown_is_refused() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary(LONG_RUNNING);
    let (supervisor, _halts) = build(fixture.config(), Box::new(NoKeepAlive));

    supervisor.start("-server a:1").await.unwrap();
    with_timeout(supervisor.shutdown()).await;

    assert!(!supervisor.is_running());
    assert_eq!(supervisor.current_phase(), SupervisorPhase::ShuttingDown);
    let err = supervisor.start("-server a:1").await.unwrap_err();
    assert!(matches!(err, RelayError::ShuttingDown));
    assert_eq!(count(&lines(&supervisor), "Service is being destroyed."), 1);
}

#[tokio::test]
async fn shutting_down_is_entered_once_and_kept() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary(LONG_RUNNING);
    let (supervisor, _halts) = build(fixture.config(), Box::new(NoKeepAlive));
    let mut phase = supervisor.phase();

    supervisor.start("-server a:1").await.unwrap();
    phase.borrow_and_update();
    with_timeout(supervisor.shutdown()).await;

    assert_eq!(*phase.borrow_and_update(), SupervisorPhase::ShuttingDown);
    assert_eq!(count(&lines(&supervisor), "Phantom process stopped."), 1);

    with_timeout(supervisor.shutdown()).await;
    with_timeout(supervisor.stop()).await;
    assert!(!phase.has_changed().unwrap());
    assert_eq!(supervisor.current_phase(), SupervisorPhase::ShuttingDown);
}

#[tokio::test]
async fn exit_notice_follows_every_unsolicited_exit() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary("exit 4");
    let (supervisor, _halts) = build(
        fixture.config().exit_policy(ExitPolicy::Idle),
        Box::new(NoKeepAlive),
    );
    let mut exits = supervisor.exits();

    supervisor.start("-server a:1").await.unwrap();
    with_timeout(exits.changed()).await.unwrap();
    assert_eq!(*exits.borrow_and_update(), Some(ExitNotice { code: Some(4) }));
    let error = RelayError::from(ExitNotice { code: Some(4) });
    assert!(matches!(error, RelayError::UnsolicitedExit { code: Some(4) }));

    // A solicited stop publishes nothing.
    fixture.install_primary(LONG_RUNNING);
    supervisor.start("-server a:1").await.unwrap();
    with_timeout(supervisor.stop()).await;
    assert!(!exits.has_changed().unwrap());
}

#[tokio::test]
async fn exit_during_shutdown_does_not_halt() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary(LONG_RUNNING);
    let (supervisor, mut halts) = build(fixture.config(), Box::new(NoKeepAlive));

    supervisor.start("-server a:1").await.unwrap();
    with_timeout(supervisor.shutdown()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(halts.try_recv().is_err());
}
