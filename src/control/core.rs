// src/control/core.rs

//! Pure client-side state: status plus the capped log timeline.
//!
//! Every transition and every log entry goes through [`ControlCore`], so the
//! UI and tests read one consistent, ordered history. It has no channels, no
//! Tokio types, and performs no IO; the async shell in
//! [`machine`](super::machine) feeds it events.

use std::collections::VecDeque;
use std::fmt;

use crate::config::DEFAULT_LOG_CAPACITY;
use crate::errors::{RelayError, Result};

/// User-visible status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Not yet attached to a host.
    Initial,
    Ready,
    Starting,
    Running,
    Stopping,
    Error(String),
}

impl Status {
    /// Short human text for display.
    pub fn label(&self) -> String {
        match self {
            Status::Initial => "Ready".to_string(),
            Status::Ready => "Ready to start".to_string(),
            Status::Starting => "Starting...".to_string(),
            Status::Running => "Service Running".to_string(),
            Status::Stopping => "Stopping...".to_string(),
            Status::Error(message) => format!("Error: {message}"),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// One timeline entry. `seq` increases by one per entry and is never reused,
/// so readers can ask for "everything after N" across evictions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub seq: u64,
    pub text: String,
}

#[derive(Debug)]
pub struct ControlCore {
    status: Status,
    logs: VecDeque<LogEntry>,
    capacity: usize,
    next_seq: u64,
    service_running: bool,
    /// The current Error came from a reported worker exit.
    exit_reported: bool,
}

impl Default for ControlCore {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl ControlCore {
    /// `capacity` is clamped to at least one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            status: Status::Initial,
            logs: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_seq: 0,
            service_running: false,
            exit_reported: false,
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn service_running(&self) -> bool {
        self.service_running
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current timeline, oldest first.
    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    pub fn entries_after(&self, seq: Option<u64>) -> Vec<LogEntry> {
        self.logs
            .iter()
            .filter(|entry| seq.is_none_or(|after| entry.seq > after))
            .cloned()
            .collect()
    }

    /// Append one entry, evicting the oldest past capacity.
    pub fn push_log(&mut self, text: impl Into<String>) {
        if self.logs.len() == self.capacity {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            seq: self.next_seq,
            text: text.into(),
        });
        self.next_seq += 1;
    }

    pub fn binding_started(&mut self) {
        self.push_log("Binding to service...");
    }

    pub fn bind_succeeded(&mut self) {
        if matches!(self.status, Status::Initial | Status::Error(_)) {
            self.status = Status::Ready;
            self.exit_reported = false;
        }
        self.push_log("Service connected successfully");
    }

    pub fn bind_failed(&mut self, reason: &str) {
        self.push_log(format!("Fatal: Failed to bind to service: {reason}"));
        self.status = Status::Error("Failed to bind to service".to_string());
        self.exit_reported = false;
    }

    /// Returns true if the disconnect was unexpected.
    pub fn disconnected(&mut self) -> bool {
        self.service_running = false;
        if matches!(self.status, Status::Initial | Status::Stopping) {
            return false;
        }
        // A reported worker exit names the cause; keep it.
        if !(self.exit_reported && self.status.is_error()) {
            self.status = Status::Error("Service unexpectedly disconnected".to_string());
        }
        self.push_log("Service disconnected unexpectedly");
        true
    }

    /// Validate a start request. Blank arguments fail here, before anything
    /// reaches the host.
    pub fn request_start(&mut self, arguments: &str) -> Result<()> {
        self.exit_reported = false;
        if arguments.trim().is_empty() {
            self.push_log("Error: Arguments cannot be empty.");
            self.status = Status::Error("Please enter arguments for Phantom.".to_string());
            return Err(RelayError::InvalidArguments(
                "arguments cannot be empty".to_string(),
            ));
        }
        self.push_log("Attempting to start proxy...");
        self.push_log(format!("Arguments: {arguments}"));
        self.status = Status::Starting;
        Ok(())
    }

    /// Optimistic: the start was queued, not confirmed. A disconnect that
    /// landed in between wins.
    pub fn start_dispatched(&mut self) {
        self.push_log("Proxy start command sent successfully.");
        if self.status == Status::Starting {
            self.status = Status::Running;
            self.service_running = true;
        }
    }

    pub fn request_stop(&mut self) {
        self.push_log("Sending stop command to proxy service");
        self.status = Status::Stopping;
    }

    /// Optimistic: the stop was queued, not confirmed.
    pub fn stop_dispatched(&mut self) {
        self.service_running = false;
        self.push_log("Proxy stop command sent successfully.");
        if self.status == Status::Stopping {
            self.status = Status::Ready;
        }
    }

    /// `action` is "start" or "stop".
    pub fn dispatch_failed(&mut self, action: &str, error: &RelayError) {
        self.push_log(format!("Error sending {action} command: {error}"));
        self.status = Status::Error(format!("Failed to send {action} command: {error}"));
        self.exit_reported = false;
        self.service_running = false;
    }

    /// The host reported a worker exit with no stop request behind it.
    /// Only a session that believes the worker is up moves to Error; returns
    /// true if it did.
    pub fn worker_exited(&mut self, error: &RelayError) -> bool {
        self.service_running = false;
        if !matches!(self.status, Status::Starting | Status::Running) {
            return false;
        }
        self.push_log(format!("Error: {error}"));
        self.status = Status::Error(error.to_string());
        self.exit_reported = true;
        true
    }

    /// Mirror the host's RunningFlag.
    pub fn set_service_running(&mut self, running: bool) {
        self.service_running = running;
    }
}
