// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! The first block of variants is the supervision taxonomy that surfaces to
//! the user as LogLines and `Status::Error`; the rest are ambient failures
//! (config, IO, parsing).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("worker binary not found; tried: {}", display_paths(.tried))]
    BinaryNotFound { tried: Vec<PathBuf> },

    #[error("cannot make {} executable: {reason}", .path.display())]
    PermissionDenied { path: PathBuf, reason: String },

    #[error("failed to spawn {}: {source}", .path.display())]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker exited without a stop request (code: {})", display_code(.code))]
    UnsolicitedExit { code: Option<i32> },

    #[error("failed to dispatch command: {0}")]
    DispatchFailed(String),

    #[error("failed to bind to service: {0}")]
    BindFailed(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("supervisor is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RelayError>;
