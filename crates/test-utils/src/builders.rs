#![allow(dead_code)]

use std::path::Path;

use relayvisor::config::{ConfigFile, RawConfigFile};
use relayvisor::types::ExitPolicy;

/// Builder for `ConfigFile` to simplify test setup.
///
/// Timeouts default to values short enough for tests; everything else
/// starts from the normal defaults.
pub struct ConfigBuilder {
    config: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.supervisor.graceful_timeout_ms = 1_000;
        config.supervisor.drain_grace_ms = 200;
        Self { config }
    }

    pub fn binary_name(mut self, name: &str) -> Self {
        self.config.binary.name = name.to_string();
        self
    }

    pub fn primary_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.binary.primary_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn lib_root(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.binary.lib_root = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn abis(mut self, tags: &[&str]) -> Self {
        self.config.binary.abis = Some(tags.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn replay(mut self, lines: usize) -> Self {
        self.config.supervisor.replay = lines;
        self
    }

    pub fn graceful_timeout_ms(mut self, ms: u64) -> Self {
        self.config.supervisor.graceful_timeout_ms = ms;
        self
    }

    pub fn drain_grace_ms(mut self, ms: u64) -> Self {
        self.config.supervisor.drain_grace_ms = ms;
        self
    }

    pub fn exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.config.supervisor.on_unsolicited_exit = policy;
        self
    }

    pub fn log_capacity(mut self, entries: usize) -> Self {
        self.config.client.log_capacity = entries;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
