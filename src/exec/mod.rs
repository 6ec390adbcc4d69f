// src/exec/mod.rs

//! Process supervision layer.
//!
//! - [`supervisor`] owns the single worker slot and the start/stop/shutdown
//!   operations.
//! - [`child`] spawns one worker with `tokio::process::Command` and runs its
//!   output drain and exit watcher.
//! - [`terminate`] escalates from SIGTERM to a forced kill.
//! - [`keepalive`] models the host resource held for the whole session.

pub mod child;
pub mod keepalive;
pub mod supervisor;
mod terminate;

pub use child::{ChildInfo, ExitReport};
pub use keepalive::{KeepAlive, NoKeepAlive};
pub use supervisor::{
    tokenize_arguments, ExitNotice, HaltRequest, ProcessSupervisor, SupervisorOptions,
};
