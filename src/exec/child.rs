// src/exec/child.rs

//! A single running worker process and its two background tasks.
//!
//! - the output drain reads stdout and stderr line by line into the
//!   [`LogStream`](crate::stream::LogStream), interleaved in arrival order;
//! - the exit watcher owns the `Child`, waits for it (or for a stop request),
//!   flushes the drain, clears the running flag and reports the exit code.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Split};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::errors::{RelayError, Result};
use crate::logging::WORKER_TARGET;
use crate::resolver::WorkerBinary;
use crate::stream::LogStream;
use crate::types::SupervisorPhase;

use super::supervisor::Shared;
use super::terminate::{describe_exit, terminate};

/// How a worker instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    /// True if the exit followed a stop request.
    pub solicited: bool,
}

/// Snapshot of the live worker, for callers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildInfo {
    pub pid: Option<u32>,
    pub binary: PathBuf,
    pub arguments: Vec<String>,
    pub started_at: DateTime<Local>,
}

pub(crate) struct ChildProcess {
    info: ChildInfo,
    stop_tx: Option<oneshot::Sender<()>>,
    waiter: JoinHandle<ExitReport>,
}

impl ChildProcess {
    /// Spawn `[binary, ...arguments]` and start the drain and exit tasks.
    ///
    /// The running flag is raised here, before the exit task exists, so an
    /// instant exit can never leave it stuck at `true`.
    pub(crate) async fn spawn(
        binary: &WorkerBinary,
        arguments: Vec<String>,
        shared: Arc<Shared>,
    ) -> Result<Self> {
        let mut child = spawn_command(binary.path(), &arguments)
            .await
            .map_err(|source| RelayError::SpawnFailed {
                path: binary.path().to_path_buf(),
                source,
            })?;

        let info = ChildInfo {
            pid: child.id(),
            binary: binary.path().to_path_buf(),
            arguments,
            started_at: Local::now(),
        };
        let pid = pid_label(info.pid);
        info!(pid = %pid, started_at = %info.started_at, "worker process started");

        shared.running.send_replace(true);
        shared.phase.send_replace(SupervisorPhase::Running);
        shared
            .logs
            .publish(format!("Phantom process started successfully (PID: {pid})."));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (exited_tx, exited_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = oneshot::channel();

        let drain = tokio::spawn(drain_output(
            child.stdout.take(),
            child.stderr.take(),
            shared.logs.clone(),
            cancel_rx,
            exited_rx,
            shared.options.drain_grace,
        ));

        let waiter = tokio::spawn(watch_exit(
            child,
            stop_rx,
            ExitTasks {
                drain,
                cancel_drain: cancel_tx,
                exited: exited_tx,
            },
            shared,
            pid,
        ));

        Ok(Self {
            info,
            stop_tx: Some(stop_tx),
            waiter,
        })
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.waiter.is_finished()
    }

    pub(crate) fn info(&self) -> &ChildInfo {
        &self.info
    }

    pub(crate) fn pid_label(&self) -> String {
        pid_label(self.info.pid)
    }

    /// Request termination and wait for the exit task to finish.
    pub(crate) async fn stop(mut self) -> Option<ExitReport> {
        if let Some(stop) = self.stop_tx.take() {
            if stop.send(()).is_err() {
                debug!(pid = %self.pid_label(), "worker already exited while stopping");
            }
        }
        self.join().await
    }

    /// Wait for the exit task without requesting termination.
    pub(crate) async fn join(self) -> Option<ExitReport> {
        match self.waiter.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "worker exit task did not complete");
                None
            }
        }
    }
}

fn pid_label(pid: Option<u32>) -> String {
    pid.map(|p| p.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn spawn_command(path: &Path, arguments: &[String]) -> io::Result<Child> {
    const BUSY_RETRIES: u32 = 5;

    let mut attempt = 0;
    loop {
        let mut cmd = Command::new(path);
        cmd.args(arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match cmd.spawn() {
            // A freshly written binary can be briefly busy while another
            // thread's fork still holds its write handle.
            Err(e) if is_text_busy(&e) && attempt < BUSY_RETRIES => {
                attempt += 1;
                debug!(path = %path.display(), attempt, "worker binary busy; retrying spawn");
                tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
            }
            other => return other,
        }
    }
}

#[cfg(unix)]
fn is_text_busy(e: &io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::ETXTBSY as i32)
}

#[cfg(not(unix))]
fn is_text_busy(_e: &io::Error) -> bool {
    false
}

struct ExitTasks {
    drain: JoinHandle<()>,
    cancel_drain: watch::Sender<bool>,
    exited: watch::Sender<bool>,
}

async fn watch_exit(
    mut child: Child,
    stop_rx: oneshot::Receiver<()>,
    tasks: ExitTasks,
    shared: Arc<Shared>,
    pid: String,
) -> ExitReport {
    let ExitTasks {
        mut drain,
        cancel_drain,
        exited,
    } = tasks;

    let (status, solicited) = tokio::select! {
        status = child.wait() => (status, false),
        request = stop_rx => {
            if request.is_err() {
                debug!(pid = %pid, "worker handle dropped; terminating process");
            }
            (terminate(&mut child, shared.options.graceful_timeout).await, true)
        }
    };
    exited.send_replace(true);

    // Give the drain a chance to publish what is still buffered in the pipes.
    if timeout(shared.options.drain_grace, &mut drain).await.is_err() {
        debug!(pid = %pid, "output drain still busy after exit; cancelling it");
        cancel_drain.send_replace(true);
        let _ = drain.await;
    }

    if let Err(e) = &status {
        error!(pid = %pid, error = %e, "failed waiting for worker process");
    }
    let code = status.as_ref().ok().and_then(|s| s.code());
    let described = describe_exit(&status);

    shared.running.send_replace(false);
    info!(pid = %pid, exit = %described, solicited, "worker process exited");
    shared
        .logs
        .publish(format!("Phantom process exited with code: {described}."));

    if !solicited {
        shared.on_unsolicited_exit(code);
    }

    ExitReport { code, solicited }
}

/// Read both pipes until EOF or cancellation. Dropping the readers on
/// cancellation closes the pipes, which unblocks any pending read.
async fn drain_output(
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    logs: LogStream,
    mut cancel: watch::Receiver<bool>,
    mut exited: watch::Receiver<bool>,
    grace: Duration,
) {
    debug!("worker output drain started");
    let mut out = stdout.map(|s| BufReader::new(s).split(b'\n'));
    let mut err = stderr.map(|s| BufReader::new(s).split(b'\n'));

    while out.is_some() || err.is_some() {
        tokio::select! {
            _ = cancel.changed() => {
                debug!("worker output drain cancelled");
                return;
            }
            line = next_line(&mut out), if out.is_some() => {
                if !forward(line, &logs, "stdout") {
                    out = None;
                }
            }
            line = next_line(&mut err), if err.is_some() => {
                if !forward(line, &logs, "stderr") {
                    err = None;
                }
            }
        }
    }

    // EOF normally coincides with exit; give the exit watcher a moment.
    if *exited.borrow() {
        debug!("finished reading worker output");
        return;
    }
    match timeout(grace, exited.wait_for(|done| *done)).await {
        Ok(_) => debug!("finished reading worker output"),
        Err(_) => warn!("worker closed its output while the process is still alive"),
    }
}

async fn next_line<R>(lines: &mut Option<Split<R>>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => Ok(lines.next_segment().await?.map(|bytes| {
            let mut text = String::from_utf8_lossy(&bytes).into_owned();
            if text.ends_with('\r') {
                text.pop();
            }
            text
        })),
        None => std::future::pending().await,
    }
}

/// Publish one read result. Returns false once the pipe is finished.
fn forward(line: io::Result<Option<String>>, logs: &LogStream, source: &'static str) -> bool {
    match line {
        Ok(Some(text)) => {
            debug!(target: WORKER_TARGET, source, "{text}");
            logs.publish(text);
            true
        }
        Ok(None) => {
            debug!(source, "worker pipe reached end of stream");
            false
        }
        Err(e) => {
            error!(source, error = %e, "error reading worker output");
            logs.publish(format!("Error reading Phantom output: {e}"));
            false
        }
    }
}
