// tests/service_session.rs
//
// End-to-end: ControlStateMachine -> LocalBinder -> ServiceHost ->
// ProcessSupervisor -> `/bin/sh` worker.

#![cfg(unix)]

mod common;
use crate::common::{assert_in_order, eventually, init_tracing, texts, with_timeout};

use std::sync::Arc;

use relayvisor::control::{ControlStateMachine, Status};
use relayvisor::fs::RealFileSystem;
use relayvisor::service::{Binder, HostExit, LocalBinder, ServiceCommand};
use relayvisor::types::ExitPolicy;
use relayvisor_test_utils::{ConfigBuilder, WorkerFixture};

const LONG_RUNNING: &str = r#"echo "worker up: $*"
exec sleep 30"#;

fn session(fixture: &WorkerFixture) -> (Arc<LocalBinder>, ControlStateMachine<LocalBinder>) {
    session_with(fixture.config())
}

fn session_with(config: ConfigBuilder) -> (Arc<LocalBinder>, ControlStateMachine<LocalBinder>) {
    let binder = Arc::new(LocalBinder::new(config.build(), Arc::new(RealFileSystem)));
    let machine = ControlStateMachine::new(Arc::clone(&binder), 500);
    (binder, machine)
}

fn timeline(machine: &ControlStateMachine<LocalBinder>) -> Vec<String> {
    texts(&machine.logs())
}

fn has(machine: &ControlStateMachine<LocalBinder>, needle: &str) -> bool {
    timeline(machine).iter().any(|t| t.contains(needle))
}

#[tokio::test]
async fn start_stop_session() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary(LONG_RUNNING);
    let (binder, machine) = session(&fixture);

    machine.bind().await.unwrap();
    assert_eq!(machine.status(), Status::Ready);

    machine.start("-server example.com:19132").await.unwrap();
    assert_eq!(machine.status(), Status::Running);
    eventually(|| has(&machine, "worker up: -server example.com:19132")).await;
    eventually(|| machine.is_service_running()).await;

    machine.stop().await.unwrap();
    assert_eq!(machine.status(), Status::Ready);
    eventually(|| has(&machine, "Phantom process stopped.")).await;
    eventually(|| !machine.is_service_running()).await;

    assert_in_order(
        &timeline(&machine),
        &[
            "Service connected successfully",
            "Service created.",
            "Received start request:",
            "  Args: [-server example.com:19132]",
            "Starting Phantom process...",
            "worker up:",
            "Received STOP command.",
            "Stopping Phantom process...",
            "Phantom process stopped.",
        ],
    );

    // The host survives a stop.
    let supervisor = binder.supervisor().await.expect("host still alive");
    assert!(!supervisor.is_running());

    machine.unbind().await;
    let exit = with_timeout(binder.shutdown()).await;
    assert_eq!(exit, Some(HostExit::ShutdownRequested));
}

#[tokio::test]
async fn crash_ends_session_and_rebind_recovers() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary("echo \"bye\"\nexit 1");
    let (binder, machine) = session(&fixture);
    let mut status = machine.subscribe_status();

    machine.start("-server a:1").await.unwrap();
    with_timeout(status.wait_for(|s| s.is_error())).await.unwrap();
    eventually(|| has(&machine, "Service disconnected unexpectedly")).await;

    // The exit code outlives the disconnect.
    assert_eq!(
        machine.status(),
        Status::Error("worker exited without a stop request (code: 1)".to_string())
    );
    assert_in_order(
        &timeline(&machine),
        &[
            "bye",
            "Phantom process exited with code: 1.",
            "Process stopped unexpectedly. Stopping service.",
            "Service is being destroyed.",
            "Service disconnected unexpectedly",
        ],
    );
    assert_in_order(
        &timeline(&machine),
        &[
            "Error: worker exited without a stop request (code: 1)",
            "Service disconnected unexpectedly",
        ],
    );
    assert!(binder.supervisor().await.is_none());

    fixture.install_primary(LONG_RUNNING);
    machine.bind().await.unwrap();
    assert_eq!(machine.status(), Status::Ready);
    eventually(|| {
        timeline(&machine)
            .iter()
            .filter(|t| t.as_str() == "Service created.")
            .count()
            == 2
    })
    .await;
    // History from the first host is kept.
    assert!(has(&machine, "Phantom process exited with code: 1."));

    machine.unbind().await;
    with_timeout(binder.shutdown()).await;
}

#[tokio::test]
async fn crash_under_idle_policy_is_an_error_and_keeps_the_host() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary("echo \"bye\"\nexit 1");
    let (binder, machine) = session_with(fixture.config().exit_policy(ExitPolicy::Idle));
    let mut status = machine.subscribe_status();

    machine.start("-server a:1").await.unwrap();
    with_timeout(status.wait_for(|s| s.is_error())).await.unwrap();

    assert_eq!(
        machine.status(),
        Status::Error("worker exited without a stop request (code: 1)".to_string())
    );
    eventually(|| has(&machine, "Waiting for a new start command.")).await;
    assert_in_order(
        &timeline(&machine),
        &["bye", "Phantom process exited with code: 1."],
    );
    assert!(!machine.is_service_running());
    assert!(machine.is_bound().await);
    assert!(!has(&machine, "Service disconnected unexpectedly"));
    let supervisor = binder.supervisor().await.expect("host survives the crash");
    assert!(!supervisor.is_running());

    // The same host takes the next start.
    fixture.install_primary(LONG_RUNNING);
    machine.start("-server a:2").await.unwrap();
    assert_eq!(machine.status(), Status::Running);
    eventually(|| has(&machine, "worker up: -server a:2")).await;
    assert!(Arc::ptr_eq(
        &supervisor,
        &binder.supervisor().await.expect("host still alive")
    ));

    machine.stop().await.unwrap();
    machine.unbind().await;
    let exit = with_timeout(binder.shutdown()).await;
    assert_eq!(exit, Some(HostExit::ShutdownRequested));
}

#[tokio::test]
async fn start_then_immediate_stop_leaves_no_worker() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary(LONG_RUNNING);
    let (binder, machine) = session(&fixture);

    machine.start("-server a:1").await.unwrap();
    machine.stop().await.unwrap();
    assert_eq!(machine.status(), Status::Ready);

    // Commands run in order, so the stop lands after the spawn.
    eventually(|| has(&machine, "Phantom process stopped.")).await;
    let supervisor = binder.supervisor().await.expect("host still alive");
    assert!(!supervisor.is_running());
    assert!(supervisor.active_child().await.is_none());
    assert_eq!(machine.status(), Status::Ready);

    machine.unbind().await;
    with_timeout(binder.shutdown()).await;
}

#[tokio::test]
async fn missing_binary_fails_the_session() {
    init_tracing();
    let fixture = WorkerFixture::new();
    let (binder, machine) = session(&fixture);
    let mut status = machine.subscribe_status();

    machine.start("-server a:1").await.unwrap();
    with_timeout(status.wait_for(|s| s.is_error())).await.unwrap();

    assert_in_order(
        &timeline(&machine),
        &[
            "Error: Failed to get binary file:",
            "Service is being destroyed.",
            "Service disconnected unexpectedly",
        ],
    );
    let exit = with_timeout(binder.shutdown()).await;
    assert!(matches!(exit, Some(HostExit::StartFailed(_))), "{exit:?}");
}

#[tokio::test]
async fn host_rejects_start_without_arguments() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary(LONG_RUNNING);
    let binder = LocalBinder::new(fixture.config().build(), Arc::new(RealFileSystem));

    let binding = binder.bind().await.unwrap();
    let mut logs = binding.subscribe_logs();
    binding
        .dispatch(ServiceCommand::Start { arguments: None })
        .await
        .unwrap();

    let mut seen = Vec::new();
    while !seen.iter().any(|l: &String| l.contains("missing required arguments")) {
        let line = with_timeout(logs.next()).await.expect("log stream ended");
        seen.push(line.to_string());
    }
    assert_eq!(
        seen.last().map(String::as_str),
        Some("Error: Start command missing required arguments.")
    );
    assert!(binding.is_connected());
    assert!(!*binding.running().borrow());

    with_timeout(binder.shutdown()).await;
}

#[tokio::test]
async fn bind_reuses_the_live_host() {
    init_tracing();
    let fixture = WorkerFixture::new();
    fixture.install_primary(LONG_RUNNING);
    let binder = LocalBinder::new(fixture.config().build(), Arc::new(RealFileSystem));

    binder.bind().await.unwrap();
    let first = binder.supervisor().await.unwrap();
    binder.bind().await.unwrap();
    let second = binder.supervisor().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    with_timeout(binder.shutdown()).await;
    assert!(binder.supervisor().await.is_none());
}

#[tokio::test]
async fn command_wire_format() {
    let start = ServiceCommand::start("-server a:1");
    assert_eq!(
        start.to_json().unwrap(),
        r#"{"action":"start","arguments":"-server a:1"}"#
    );
    assert_eq!(
        ServiceCommand::from_json(r#"{"action":"stop"}"#).unwrap(),
        ServiceCommand::Stop
    );
    assert_eq!(
        ServiceCommand::from_json(r#" {"action":"start"} "#).unwrap(),
        ServiceCommand::Start { arguments: None }
    );
    assert!(ServiceCommand::from_json(r#"{"action":"restart"}"#).is_err());
}
