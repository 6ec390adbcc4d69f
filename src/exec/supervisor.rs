// src/exec/supervisor.rs

//! Owner of at most one live worker process.
//!
//! `start`, `stop` and `shutdown` serialize on a single async mutex around
//! the child slot, so concurrent starts always end with exactly one live
//! child: a later start fully stops whatever the earlier one spawned.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::errors::{RelayError, Result};
use crate::resolver::BinaryResolver;
use crate::stream::LogStream;
use crate::types::{ExitPolicy, SupervisorPhase};

use super::child::{ChildInfo, ChildProcess};
use super::keepalive::{KeepAlive, KeepAliveGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// How long a worker gets to exit after SIGTERM before it is killed.
    pub graceful_timeout: Duration,
    /// How long to wait for buffered output after the worker exits.
    pub drain_grace: Duration,
    pub exit_policy: ExitPolicy,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(3),
            drain_grace: Duration::from_millis(500),
            exit_policy: ExitPolicy::Halt,
        }
    }
}

/// Sent to the host when the session must end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltRequest {
    UnsolicitedExit { code: Option<i32> },
}

/// Published to clients whenever the worker exits with no stop request
/// behind it, whatever the exit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitNotice {
    pub code: Option<i32>,
}

impl From<ExitNotice> for RelayError {
    fn from(notice: ExitNotice) -> Self {
        RelayError::UnsolicitedExit { code: notice.code }
    }
}

/// State shared with the per-child background tasks.
pub(crate) struct Shared {
    pub(crate) logs: LogStream,
    pub(crate) running: watch::Sender<bool>,
    pub(crate) phase: watch::Sender<SupervisorPhase>,
    pub(crate) options: SupervisorOptions,
    exits: watch::Sender<Option<ExitNotice>>,
    shutting_down: AtomicBool,
    halt_tx: mpsc::UnboundedSender<HaltRequest>,
}

impl Shared {
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Exit with no stop request behind it: fail fast unless configured
    /// otherwise, and never respawn.
    pub(crate) fn on_unsolicited_exit(&self, code: Option<i32>) {
        if self.is_shutting_down() {
            debug!(?code, "worker exited during shutdown");
            return;
        }
        self.phase.send_replace(SupervisorPhase::Idle);
        // Before any halt, so a client sees the notice ahead of the disconnect.
        self.exits.send_replace(Some(ExitNotice { code }));

        match self.options.exit_policy {
            ExitPolicy::Halt => {
                warn!(?code, "worker stopped unexpectedly; halting session");
                self.logs
                    .publish("Process stopped unexpectedly. Stopping service.");
                if self
                    .halt_tx
                    .send(HaltRequest::UnsolicitedExit { code })
                    .is_err()
                {
                    debug!("no host is listening for halt requests");
                }
            }
            ExitPolicy::Idle => {
                warn!(?code, "worker stopped unexpectedly; supervisor idle");
                self.logs
                    .publish("Process stopped unexpectedly. Waiting for a new start command.");
            }
        }
    }
}

pub struct ProcessSupervisor {
    resolver: BinaryResolver,
    shared: Arc<Shared>,
    slot: Mutex<Option<ChildProcess>>,
    keepalive: KeepAliveGuard,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("resolver", &self.resolver)
            .field("phase", &*self.shared.phase.borrow())
            .field("running", &*self.shared.running.borrow())
            .finish_non_exhaustive()
    }
}

/// Split a start argument string on ASCII spaces, dropping blank tokens.
/// No quoting support.
pub fn tokenize_arguments(arguments: &str) -> Vec<String> {
    arguments
        .split(' ')
        .filter(|token| !token.trim().is_empty())
        .map(str::to_string)
        .collect()
}

impl ProcessSupervisor {
    /// Create a supervisor and acquire its keepalive for the session.
    ///
    /// The returned receiver yields [`HaltRequest`]s that the owning host
    /// must act on.
    pub fn new(
        resolver: BinaryResolver,
        logs: LogStream,
        options: SupervisorOptions,
        keepalive: Box<dyn KeepAlive>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HaltRequest>)> {
        let keepalive = KeepAliveGuard::acquire(keepalive)?;
        let (halt_tx, halt_rx) = mpsc::unbounded_channel();
        let (running, _) = watch::channel(false);
        let (phase, _) = watch::channel(SupervisorPhase::Idle);
        let (exits, _) = watch::channel(None);

        let shared = Arc::new(Shared {
            logs,
            running,
            phase,
            options,
            exits,
            shutting_down: AtomicBool::new(false),
            halt_tx,
        });

        Ok((
            Self {
                resolver,
                shared,
                slot: Mutex::new(None),
                keepalive,
            },
            halt_rx,
        ))
    }

    pub fn logs(&self) -> &LogStream {
        &self.shared.logs
    }

    /// The RunningFlag: true iff a worker process is alive.
    pub fn running(&self) -> watch::Receiver<bool> {
        self.shared.running.subscribe()
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }

    /// Changes on every unsolicited worker exit.
    pub fn exits(&self) -> watch::Receiver<Option<ExitNotice>> {
        self.shared.exits.subscribe()
    }

    pub fn phase(&self) -> watch::Receiver<SupervisorPhase> {
        self.shared.phase.subscribe()
    }

    pub fn current_phase(&self) -> SupervisorPhase {
        *self.shared.phase.borrow()
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.shared.options
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_shutting_down()
    }

    /// Details of the live worker, if any.
    pub async fn active_child(&self) -> Option<ChildInfo> {
        let slot = self.slot.lock().await;
        slot.as_ref()
            .filter(|child| child.is_alive())
            .map(|child| child.info().clone())
    }

    /// Start the worker with `arguments`, replacing any live one.
    ///
    /// Resolution and spawn failures are published as LogLines and returned;
    /// they are never retried.
    pub async fn start(&self, arguments: &str) -> Result<()> {
        let mut slot = self.slot.lock().await;

        if self.is_shutting_down() {
            warn!("start requested during shutdown; ignoring");
            self.shared
                .logs
                .publish("Error: supervisor is shutting down; start ignored.");
            return Err(RelayError::ShuttingDown);
        }

        if let Some(existing) = slot.take() {
            if existing.is_alive() {
                warn!(pid = %existing.pid_label(), "worker already running; stopping it first");
                self.shared
                    .logs
                    .publish("Phantom process already running. Restarting...");
                self.stop_child(existing).await;
            } else {
                existing.join().await;
            }
        }

        self.shared.phase.send_replace(SupervisorPhase::Launching);

        let binary = match self.resolver.resolve() {
            Ok(binary) => binary,
            Err(e) => {
                error!(error = %e, "failed to resolve worker binary");
                self.shared
                    .logs
                    .publish(format!("Error: Failed to get binary file: {e}"));
                self.shared.phase.send_replace(SupervisorPhase::Idle);
                return Err(e);
            }
        };

        let tokens = tokenize_arguments(arguments);
        let command_line = std::iter::once(binary.path().display().to_string())
            .chain(tokens.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        info!(command = %command_line, abi = ?binary.abi(), "executing worker");
        self.shared.logs.publish("Starting Phantom process...");
        self.shared.logs.publish(format!("Command: {command_line}"));

        match ChildProcess::spawn(&binary, tokens, Arc::clone(&self.shared)).await {
            Ok(child) => {
                *slot = Some(child);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to start worker process");
                self.shared
                    .logs
                    .publish(format!("Error running Phantom: {e}"));
                self.shared.phase.send_replace(SupervisorPhase::Idle);
                Err(e)
            }
        }
    }

    /// Stop the live worker. A no-op when none is running, including for the
    /// second of two concurrent callers.
    pub async fn stop(&self) {
        let existing = self.slot.lock().await.take();
        self.finish(existing).await;
    }

    /// Stop the worker, release the keepalive and refuse further starts.
    /// Only the first call does anything.
    pub async fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            debug!("supervisor already shutting down");
            return;
        }
        info!("supervisor shutting down");
        self.shared.phase.send_replace(SupervisorPhase::ShuttingDown);
        self.shared.logs.publish("Service is being destroyed.");

        let existing = self.slot.lock().await.take();
        self.finish(existing).await;
        // A stop that was already past its shutdown check may have moved
        // the phase; settle it without a second notification otherwise.
        self.shared.phase.send_if_modified(|phase| {
            let moved = *phase != SupervisorPhase::ShuttingDown;
            *phase = SupervisorPhase::ShuttingDown;
            moved
        });

        self.keepalive.release();
        info!("supervisor cleanup complete");
    }

    async fn finish(&self, existing: Option<ChildProcess>) {
        match existing {
            Some(child) if child.is_alive() => self.stop_child(child).await,
            Some(child) => {
                debug!(pid = %child.pid_label(), "worker already exited; reaping");
                child.join().await;
            }
            None => debug!("stop requested, but no worker is running"),
        }
    }

    async fn stop_child(&self, child: ChildProcess) {
        let pid = child.pid_label();
        info!(pid = %pid, "stopping worker process");
        // ShuttingDown is terminal.
        if !self.is_shutting_down() {
            self.shared.phase.send_replace(SupervisorPhase::Stopping);
        }
        self.shared.logs.publish("Stopping Phantom process...");

        let report = child.stop().await;
        self.shared.running.send_replace(false);

        match report {
            Some(report) if report.solicited => {
                info!(pid = %pid, code = ?report.code, "worker process stopped");
                self.shared.logs.publish("Phantom process stopped.");
            }
            Some(report) => {
                debug!(pid = %pid, code = ?report.code, "worker exited before the stop request landed");
            }
            None => warn!(pid = %pid, "worker exit task ended abnormally"),
        }

        if !self.is_shutting_down() {
            self.shared.phase.send_replace(SupervisorPhase::Idle);
        }
    }
}
