// src/exec/keepalive.rs

//! Keepalive resource held for the lifetime of a supervisor session.
//!
//! On a mobile host this is a wake lock; on a desktop or server host there is
//! usually nothing to hold, hence [`NoKeepAlive`]. The guard guarantees one
//! acquire at construction and at most one release.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::errors::{RelayError, Result};

pub trait KeepAlive: Send + Sync {
    fn acquire(&self) -> anyhow::Result<()>;
    fn release(&self);
}

/// Keepalive for hosts that need none.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeepAlive;

impl KeepAlive for NoKeepAlive {
    fn acquire(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn release(&self) {}
}

pub(crate) struct KeepAliveGuard {
    inner: Box<dyn KeepAlive>,
    held: AtomicBool,
}

impl KeepAliveGuard {
    pub(crate) fn acquire(inner: Box<dyn KeepAlive>) -> Result<Self> {
        inner
            .acquire()
            .map_err(|e| RelayError::Other(e.context("acquiring keepalive")))?;
        info!("keepalive acquired");
        Ok(Self {
            inner,
            held: AtomicBool::new(true),
        })
    }

    pub(crate) fn release(&self) {
        if self.held.swap(false, Ordering::AcqRel) {
            self.inner.release();
            info!("keepalive released");
        }
    }
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        self.release();
    }
}
