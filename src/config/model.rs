// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::exec::SupervisorOptions;
use crate::resolver::{Abi, CandidateLayout, DEFAULT_BINARY_NAME};
use crate::stream::DEFAULT_REPLAY;
use crate::types::ExitPolicy;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [binary]
/// name = "libphantom.so"
/// lib_root = "/opt/relay/lib"
/// abis = ["arm64-v8a", "armeabi-v7a"]
///
/// [supervisor]
/// replay = 50
/// graceful_timeout_ms = 3000
/// on_unsolicited_exit = "halt"
///
/// [client]
/// log_capacity = 500
/// ```
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub binary: BinarySection,

    #[serde(default)]
    pub supervisor: SupervisorSection,

    #[serde(default)]
    pub client: ClientSection,
}

/// `[binary]` section: where to look for the worker executable.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinarySection {
    #[serde(default = "default_binary_name")]
    pub name: String,

    /// Defaults to the directory of the running executable.
    #[serde(default)]
    pub primary_dir: Option<PathBuf>,

    /// Parent of the per-ABI directories. Defaults to `<exe dir>/lib`.
    #[serde(default)]
    pub lib_root: Option<PathBuf>,

    /// ABI tags in preference order. Defaults to what the platform supports.
    #[serde(default)]
    pub abis: Option<Vec<String>>,
}

fn default_binary_name() -> String {
    DEFAULT_BINARY_NAME.to_string()
}

impl Default for BinarySection {
    fn default() -> Self {
        Self {
            name: default_binary_name(),
            primary_dir: None,
            lib_root: None,
            abis: None,
        }
    }
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorSection {
    /// Lines replayed to a late log subscriber.
    #[serde(default = "default_replay")]
    pub replay: usize,

    /// SIGTERM grace period before the worker is killed. 0 kills at once.
    #[serde(default = "default_graceful_timeout_ms")]
    pub graceful_timeout_ms: u64,

    /// How long to wait for trailing output after the worker exits.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    #[serde(default)]
    pub on_unsolicited_exit: ExitPolicy,
}

fn default_replay() -> usize {
    DEFAULT_REPLAY
}

fn default_graceful_timeout_ms() -> u64 {
    3_000
}

fn default_drain_grace_ms() -> u64 {
    500
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            replay: default_replay(),
            graceful_timeout_ms: default_graceful_timeout_ms(),
            drain_grace_ms: default_drain_grace_ms(),
            on_unsolicited_exit: ExitPolicy::default(),
        }
    }
}

/// `[client]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    /// Entries kept in the client-side history.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

pub const DEFAULT_LOG_CAPACITY: usize = 500;

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
        }
    }
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub binary: BinarySection,
    pub supervisor: SupervisorSection,
    pub client: ClientSection,
    abis: Vec<Abi>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile, abis: Vec<Abi>) -> Self {
        Self {
            binary: raw.binary,
            supervisor: raw.supervisor,
            client: raw.client,
            abis,
        }
    }

    /// ABI preference order in effect.
    pub fn abis(&self) -> &[Abi] {
        &self.abis
    }

    pub fn candidate_layout(&self) -> CandidateLayout {
        let mut layout = CandidateLayout::beside_current_exe(self.binary.name.clone());
        if let Some(dir) = &self.binary.primary_dir {
            layout.primary_dir = dir.clone();
        }
        if let Some(root) = &self.binary.lib_root {
            layout.lib_root = root.clone();
        }
        layout.abis = self.abis.clone();
        layout
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            graceful_timeout: Duration::from_millis(self.supervisor.graceful_timeout_ms),
            drain_grace: Duration::from_millis(self.supervisor.drain_grace_ms),
            exit_policy: self.supervisor.on_unsolicited_exit,
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(RawConfigFile::default(), Abi::supported())
    }
}
