// src/control/mod.rs

//! Client side: binds to a host, relays start/stop, and projects host
//! signals onto a [`Status`] plus a capped log timeline.
//!
//! - [`core`]: `ControlCore`, the pure state and timeline.
//! - [`machine`]: `ControlStateMachine`, the async shell that owns the
//!   binding and its background tasks.

pub mod core;
pub mod machine;

pub use core::{ControlCore, LogEntry, Status};
pub use machine::ControlStateMachine;
