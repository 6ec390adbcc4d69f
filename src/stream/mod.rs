// src/stream/mod.rs

//! Broadcast of log lines with bounded replay.
//!
//! One [`LogStream`] per host context. The supervisor, the drain loop and the
//! host itself publish into it; clients subscribe and receive the most
//! recent lines first, then the live tail.

pub mod log_stream;

use std::fmt;
use std::sync::Arc;

pub use log_stream::{LogStream, LogSubscription, DEFAULT_REPLAY};

/// An immutable line of text. Cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LogLine(Arc<str>);

impl LogLine {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl From<String> for LogLine {
    fn from(s: String) -> Self {
        LogLine(Arc::from(s))
    }
}

impl From<&str> for LogLine {
    fn from(s: &str) -> Self {
        LogLine(Arc::from(s))
    }
}

impl AsRef<str> for LogLine {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
