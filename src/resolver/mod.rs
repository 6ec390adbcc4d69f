// src/resolver/mod.rs

//! Worker binary discovery.
//!
//! Resolution walks the ordered candidate list from [`CandidateLayout`],
//! picks the first existing file and repairs its execute bit if needed.
//! Nothing is cached: every start re-resolves, so a binary replaced between
//! runs is picked up.

pub mod abi;
pub mod candidates;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::errors::{RelayError, Result};
use crate::fs::FileSystem;

pub use abi::Abi;
pub use candidates::{Candidate, CandidateLayout, DEFAULT_BINARY_NAME};

/// Mode applied when a resolved binary lacks execute permission.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// A resolved, executable worker binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerBinary {
    path: PathBuf,
    abi: Option<Abi>,
}

impl WorkerBinary {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn abi(&self) -> Option<Abi> {
        self.abi
    }
}

#[derive(Debug, Clone)]
pub struct BinaryResolver {
    layout: CandidateLayout,
    fs: Arc<dyn FileSystem>,
}

impl BinaryResolver {
    pub fn new(layout: CandidateLayout, fs: Arc<dyn FileSystem>) -> Self {
        Self { layout, fs }
    }

    pub fn layout(&self) -> &CandidateLayout {
        &self.layout
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        self.layout.candidates()
    }

    pub fn resolve(&self) -> Result<WorkerBinary> {
        let candidates = self.candidates();

        let Some(found) = candidates.iter().find(|c| {
            debug!(path = %c.path.display(), primary = c.primary, "checking for worker binary");
            self.fs.is_file(&c.path)
        }) else {
            error!(
                name = %self.layout.binary_name,
                tried = candidates.len(),
                "worker binary not found in any candidate location"
            );
            self.dump_layout();
            return Err(RelayError::BinaryNotFound {
                tried: candidates.into_iter().map(|c| c.path).collect(),
            });
        };

        self.ensure_executable(&found.path)?;

        info!(
            path = %found.path.display(),
            abi = ?found.abi,
            "worker binary is ready to execute"
        );
        Ok(WorkerBinary {
            path: found.path.clone(),
            abi: found.abi,
        })
    }

    fn ensure_executable(&self, path: &Path) -> Result<()> {
        if self.fs.is_executable(path) {
            return Ok(());
        }

        warn!(path = %path.display(), "worker binary not executable; applying chmod 755");
        if let Err(e) = self.fs.set_mode(path, EXECUTABLE_MODE) {
            error!(path = %path.display(), error = %e, "chmod failed");
            return Err(RelayError::PermissionDenied {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }

        if !self.fs.is_executable(path) {
            error!(path = %path.display(), "binary still not executable after chmod");
            return Err(RelayError::PermissionDenied {
                path: path.to_path_buf(),
                reason: "execute permission did not stick after chmod".to_string(),
            });
        }

        Ok(())
    }

    /// Debug-level tree of the install dirs, to show what *is* there when
    /// the binary is missing.
    fn dump_layout(&self) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        debug!("--- install directory dump ---");
        self.log_tree(&self.layout.primary_dir, "primary: ", 0);
        if self.layout.lib_root != self.layout.primary_dir {
            self.log_tree(&self.layout.lib_root, "lib_root: ", 0);
        }
        debug!("--- end install directory dump ---");
    }

    fn log_tree(&self, dir: &Path, prefix: &str, depth: usize) {
        const MAX_DEPTH: usize = 3;

        if !self.fs.exists(dir) {
            debug!("{prefix}[missing: {}]", dir.display());
            return;
        }
        if !self.fs.is_dir(dir) {
            debug!("{prefix}[not a directory: {}]", dir.display());
            return;
        }

        let mut entries = match self.fs.read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("{prefix}[unreadable: {e}]");
                return;
            }
        };
        if entries.is_empty() {
            debug!("{prefix}[empty: {}]", dir.display());
            return;
        }
        entries.sort();

        let last = entries.len() - 1;
        for (i, entry) in entries.iter().enumerate() {
            let name = entry
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let (connector, indent) = if i == last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };
            if self.fs.is_dir(entry) {
                debug!("{prefix}{connector}{name}/");
                if depth < MAX_DEPTH {
                    self.log_tree(entry, &format!("{prefix}{indent}"), depth + 1);
                }
            } else {
                debug!("{prefix}{connector}{name}");
            }
        }
    }
}
