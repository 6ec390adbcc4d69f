#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::builders::ConfigBuilder;

/// A temporary install layout with shell-script workers.
///
/// ```text
/// <tmp>/app/<name>              primary location
/// <tmp>/lib/<abi>/<name>        per-ABI locations
/// ```
pub struct WorkerFixture {
    dir: TempDir,
    name: String,
}

impl WorkerFixture {
    pub fn new() -> Self {
        Self::named("libphantom.so")
    }

    pub fn named(name: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::create_dir_all(dir.path().join("app")).expect("create app dir");
        fs::create_dir_all(dir.path().join("lib")).expect("create lib dir");
        Self {
            dir,
            name: name.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn primary_dir(&self) -> PathBuf {
        self.dir.path().join("app")
    }

    pub fn lib_root(&self) -> PathBuf {
        self.dir.path().join("lib")
    }

    /// Write an executable `/bin/sh` worker with `body` to the primary dir.
    pub fn install_primary(&self, body: &str) -> PathBuf {
        let path = self.primary_dir().join(&self.name);
        write_script(&path, body, 0o755);
        path
    }

    /// Write a worker with `body` under `lib/<abi>/`, with the given mode.
    pub fn install_abi(&self, abi: &str, body: &str, mode: u32) -> PathBuf {
        let dir = self.lib_root().join(abi);
        fs::create_dir_all(&dir).expect("create abi dir");
        let path = dir.join(&self.name);
        write_script(&path, body, mode);
        path
    }

    /// A config pointing at this layout.
    pub fn config(&self) -> ConfigBuilder {
        ConfigBuilder::new()
            .binary_name(&self.name)
            .primary_dir(self.primary_dir())
            .lib_root(self.lib_root())
    }
}

impl Default for WorkerFixture {
    fn default() -> Self {
        Self::new()
    }
}

fn write_script(path: &Path, body: &str, mode: u32) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write worker script");
    set_mode(path, mode);
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("set worker mode");
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}
