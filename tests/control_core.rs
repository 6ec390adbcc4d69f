// tests/control_core.rs

mod common;
use crate::common::texts;

use proptest::prelude::*;
use relayvisor::control::{ControlCore, LogEntry, Status};
use relayvisor::errors::RelayError;

fn timeline(core: &ControlCore) -> Vec<String> {
    let entries: Vec<LogEntry> = core.logs().cloned().collect();
    texts(&entries)
}

fn ready_core() -> ControlCore {
    let mut core = ControlCore::default();
    core.binding_started();
    core.bind_succeeded();
    core
}

#[test]
fn bind_success_moves_initial_to_ready() {
    let core = ready_core();
    assert_eq!(core.status(), &Status::Ready);
    assert_eq!(
        timeline(&core),
        vec!["Binding to service...", "Service connected successfully"]
    );
}

#[test]
fn bind_failure_is_an_error() {
    let mut core = ControlCore::default();
    core.binding_started();
    core.bind_failed("no host");

    assert_eq!(
        core.status(),
        &Status::Error("Failed to bind to service".to_string())
    );
    assert!(timeline(&core)[1].starts_with("Fatal: Failed to bind to service"));
}

#[test]
fn blank_arguments_fail_fast() {
    let mut core = ready_core();

    let result = core.request_start("   \t ");

    assert!(matches!(result, Err(RelayError::InvalidArguments(_))));
    assert_eq!(
        core.status(),
        &Status::Error("Please enter arguments for Phantom.".to_string())
    );
    assert_eq!(
        timeline(&core).last().map(String::as_str),
        Some("Error: Arguments cannot be empty.")
    );
}

#[test]
fn start_goes_through_starting_to_running() {
    let mut core = ready_core();

    core.request_start("-server a:1").unwrap();
    assert_eq!(core.status(), &Status::Starting);
    assert!(!core.service_running());

    core.start_dispatched();
    assert_eq!(core.status(), &Status::Running);
    assert!(core.service_running());

    let texts = timeline(&core);
    assert!(texts.contains(&"Arguments: -server a:1".to_string()));
    assert_eq!(
        texts.last().map(String::as_str),
        Some("Proxy start command sent successfully.")
    );
}

#[test]
fn stop_is_optimistic() {
    let mut core = ready_core();
    core.request_start("-server a:1").unwrap();
    core.start_dispatched();

    core.request_stop();
    assert_eq!(core.status(), &Status::Stopping);

    core.stop_dispatched();
    assert_eq!(core.status(), &Status::Ready);
    assert!(!core.service_running());
}

#[test]
fn disconnect_while_running_is_an_error() {
    let mut core = ready_core();
    core.request_start("-server a:1").unwrap();
    core.start_dispatched();

    assert!(core.disconnected());
    assert_eq!(
        core.status(),
        &Status::Error("Service unexpectedly disconnected".to_string())
    );
    assert!(!core.service_running());
}

#[test]
fn disconnect_while_stopping_is_expected() {
    let mut core = ready_core();
    core.request_stop();

    assert!(!core.disconnected());
    assert_eq!(core.status(), &Status::Stopping);
}

#[test]
fn rebind_recovers_from_error() {
    let mut core = ready_core();
    core.disconnected();
    assert!(core.status().is_error());

    core.bind_succeeded();
    assert_eq!(core.status(), &Status::Ready);
}

#[test]
fn rebind_keeps_running_status() {
    let mut core = ready_core();
    core.request_start("x").unwrap();
    core.start_dispatched();

    core.bind_succeeded();
    assert_eq!(core.status(), &Status::Running);
}

#[test]
fn dispatch_failure_names_the_command() {
    let mut core = ready_core();
    let err = RelayError::DispatchFailed("service is not running".to_string());

    core.dispatch_failed("stop", &err);

    match core.status() {
        Status::Error(msg) => assert!(msg.starts_with("Failed to send stop command")),
        other => panic!("Expected Error, got: {other:?}"),
    }
    assert!(timeline(&core).last().unwrap().starts_with("Error sending stop command"));
}

#[test]
fn worker_exit_while_running_is_an_error() {
    let mut core = ready_core();
    core.request_start("-server a:1").unwrap();
    core.start_dispatched();

    assert!(core.worker_exited(&RelayError::UnsolicitedExit { code: Some(1) }));
    assert_eq!(
        core.status(),
        &Status::Error("worker exited without a stop request (code: 1)".to_string())
    );
    assert!(!core.service_running());
    assert_eq!(
        timeline(&core).last().map(String::as_str),
        Some("Error: worker exited without a stop request (code: 1)")
    );

    // The host going away afterwards does not hide the exit code.
    assert!(core.disconnected());
    assert_eq!(
        core.status(),
        &Status::Error("worker exited without a stop request (code: 1)".to_string())
    );
    assert_eq!(
        timeline(&core).last().map(String::as_str),
        Some("Service disconnected unexpectedly")
    );
}

#[test]
fn worker_exit_when_not_running_is_ignored() {
    let mut core = ready_core();
    let before = timeline(&core).len();

    assert!(!core.worker_exited(&RelayError::UnsolicitedExit { code: None }));
    assert_eq!(core.status(), &Status::Ready);
    assert_eq!(timeline(&core).len(), before);

    core.request_stop();
    assert!(!core.worker_exited(&RelayError::UnsolicitedExit { code: None }));
    assert_eq!(core.status(), &Status::Stopping);
}

#[test]
fn new_start_forgets_an_earlier_worker_exit() {
    let mut core = ready_core();
    core.request_start("x").unwrap();
    core.start_dispatched();
    core.worker_exited(&RelayError::UnsolicitedExit { code: Some(2) });

    core.request_start("x").unwrap();
    core.start_dispatched();
    assert_eq!(core.status(), &Status::Running);

    core.disconnected();
    assert_eq!(
        core.status(),
        &Status::Error("Service unexpectedly disconnected".to_string())
    );
}

#[test]
fn labels_match_display_texts() {
    assert_eq!(Status::Initial.label(), "Ready");
    assert_eq!(Status::Ready.label(), "Ready to start");
    assert_eq!(Status::Starting.label(), "Starting...");
    assert_eq!(Status::Running.label(), "Service Running");
    assert_eq!(Status::Stopping.label(), "Stopping...");
    assert_eq!(Status::Error("boom".into()).to_string(), "Error: boom");
}

#[test]
fn entries_after_skips_seen_entries() {
    let mut core = ControlCore::new(10);
    core.push_log("a");
    core.push_log("b");
    core.push_log("c");

    let after: Vec<String> = core.entries_after(Some(0)).into_iter().map(|e| e.text).collect();
    assert_eq!(after, vec!["b", "c"]);
    assert_eq!(core.entries_after(None).len(), 3);
}

proptest! {
    #[test]
    fn timeline_is_capped_and_keeps_the_newest(capacity in 1usize..64, pushes in 0usize..300) {
        let mut core = ControlCore::new(capacity);
        for i in 0..pushes {
            core.push_log(format!("line {i}"));
        }

        let entries: Vec<LogEntry> = core.logs().cloned().collect();
        prop_assert_eq!(entries.len(), pushes.min(capacity));

        // Consecutive sequence numbers ending at the last push.
        for pair in entries.windows(2) {
            prop_assert_eq!(pair[1].seq, pair[0].seq + 1);
        }
        if let Some(last) = entries.last() {
            prop_assert_eq!(last.seq as usize, pushes - 1);
            prop_assert_eq!(&last.text, &format!("line {}", pushes - 1));
        }
    }

    #[test]
    fn default_capacity_is_500(pushes in 480usize..560) {
        let mut core = ControlCore::default();
        for i in 0..pushes {
            core.push_log(format!("{i}"));
        }
        prop_assert_eq!(core.logs().count(), pushes.min(500));
    }
}
