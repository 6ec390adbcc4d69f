// src/exec/terminate.rs

//! Graceful-then-forced termination of a worker process.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Ask the child to exit, wait up to `grace`, then kill it.
///
/// A zero `grace` skips straight to the kill.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        debug!(?status, "worker already exited before termination");
        return Ok(status);
    }

    if !grace.is_zero() && request_graceful_exit(child) {
        match timeout(grace, child.wait()).await {
            Ok(status) => return status,
            Err(_) => warn!(
                pid = ?child.id(),
                grace_ms = grace.as_millis() as u64,
                "worker did not exit after SIGTERM; forcing"
            ),
        }
    }

    if let Err(e) = child.start_kill() {
        warn!(pid = ?child.id(), error = %e, "failed to kill worker process");
    }
    child.wait().await
}

#[cfg(unix)]
fn request_graceful_exit(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {
            debug!(pid, "sent SIGTERM to worker");
            true
        }
        Err(e) => {
            warn!(pid, error = %e, "failed to send SIGTERM to worker");
            false
        }
    }
}

#[cfg(not(unix))]
fn request_graceful_exit(_child: &Child) -> bool {
    false
}

/// Human-readable exit description: the code, or the terminating signal.
pub(crate) fn describe_exit(status: &io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => {
            if let Some(code) = status.code() {
                return code.to_string();
            }
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    return format!("unknown (signal {signal})");
                }
            }
            "unknown".to_string()
        }
        Err(_) => "unknown".to_string(),
    }
}
