use std::str::FromStr;
use serde::Deserialize;

/// What the supervisor does when the worker exits without a stop request.
///
/// - `Halt`: treat the exit as fatal to the session and halt the host
///   context (default). A crashed proxy is surfaced, never respawned.
/// - `Idle`: return to idle and keep the host alive for the next start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitPolicy {
    Halt,
    Idle,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        ExitPolicy::Halt
    }
}

impl FromStr for ExitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "halt" => Ok(ExitPolicy::Halt),
            "idle" => Ok(ExitPolicy::Idle),
            other => Err(format!(
                "invalid on_unsolicited_exit: {other} (expected \"halt\" or \"idle\")"
            )),
        }
    }
}

/// Coarse lifecycle phase of the process supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    Idle,
    Launching,
    Running,
    Stopping,
    /// Terminal; entered once on final teardown.
    ShuttingDown,
}
