// src/service/mod.rs

//! Host side of the client/host boundary.
//!
//! - [`command`]: the start/stop command wire type.
//! - [`host`]: `ServiceHost`, the session owner that drives a supervisor.
//! - [`binder`]: the `Binder` seam clients attach through.

pub mod binder;
pub mod command;
pub mod host;

pub use binder::{Binder, Binding, LocalBinder};
pub use command::ServiceCommand;
pub use host::{HostExit, ServiceHandle, ServiceHost};
