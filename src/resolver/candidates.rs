// src/resolver/candidates.rs

//! Ordered candidate paths for the worker binary.

use std::path::PathBuf;

use super::abi::Abi;

/// Default file name of the bundled worker executable.
pub const DEFAULT_BINARY_NAME: &str = "libphantom.so";

/// Where binaries are installed.
///
/// ```text
/// <primary_dir>/<binary_name>            tried first
/// <lib_root>/<abi>/<binary_name>         one per ABI, in preference order
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLayout {
    pub binary_name: String,
    pub primary_dir: PathBuf,
    pub lib_root: PathBuf,
    pub abis: Vec<Abi>,
}

/// One path the resolver will probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    /// ABI the path is expected to hold; `None` when the platform reports no
    /// supported ABI and only the primary dir is tried.
    pub abi: Option<Abi>,
    pub primary: bool,
}

impl CandidateLayout {
    /// Layout rooted next to the running executable: the primary dir is the
    /// executable's own directory and per-ABI dirs live under `lib/`.
    pub fn beside_current_exe(binary_name: impl Into<String>) -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            binary_name: binary_name.into(),
            lib_root: exe_dir.join("lib"),
            primary_dir: exe_dir,
            abis: Abi::supported(),
        }
    }

    /// Candidates in probe order, without duplicates.
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut out = vec![Candidate {
            path: self.primary_dir.join(&self.binary_name),
            abi: self.abis.first().copied(),
            primary: true,
        }];

        for abi in &self.abis {
            let path = self.lib_root.join(abi.tag()).join(&self.binary_name);
            if out.iter().any(|c| c.path == path) {
                continue;
            }
            out.push(Candidate {
                path,
                abi: Some(*abi),
                primary: false,
            });
        }

        out
    }
}
