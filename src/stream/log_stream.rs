// src/stream/log_stream.rs

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::{self, Stream};
use tokio::sync::broadcast;
use tracing::warn;

use super::LogLine;

/// Default number of lines replayed to a new subscriber.
pub const DEFAULT_REPLAY: usize = 50;

/// Live-tail buffer per subscriber. A subscriber that falls further behind
/// than this loses the oldest lines; the publisher never waits.
const LIVE_BUFFER: usize = 1024;

/// Single-writer, multi-reader line broadcast with ring-buffer replay.
///
/// `publish` and `subscribe` share one lock, so a subscriber's replay and its
/// live tail join without gaps or duplicates.
#[derive(Clone)]
pub struct LogStream {
    inner: Arc<Mutex<Ring>>,
    capacity: usize,
}

struct Ring {
    lines: VecDeque<LogLine>,
    tx: broadcast::Sender<LogLine>,
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("capacity", &self.capacity)
            .field("buffered", &self.lock().lines.len())
            .finish_non_exhaustive()
    }
}

impl Default for LogStream {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY)
    }
}

impl LogStream {
    /// `capacity` is clamped to at least one line.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(LIVE_BUFFER.max(capacity));
        Self {
            inner: Arc::new(Mutex::new(Ring {
                lines: VecDeque::with_capacity(capacity),
                tx,
            })),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn publish(&self, line: impl Into<LogLine>) {
        let line = line.into();
        let mut ring = self.lock();
        if ring.lines.len() == self.capacity {
            ring.lines.pop_front();
        }
        ring.lines.push_back(line.clone());
        // No receivers is fine: the line still lands in the replay buffer.
        let _ = ring.tx.send(line);
    }

    pub fn subscribe(&self) -> LogSubscription {
        let ring = self.lock();
        LogSubscription {
            replay: ring.lines.clone(),
            live: ring.tx.subscribe(),
        }
    }

    /// Copy of the current replay buffer, oldest first.
    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lock().lines.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A subscriber's view: replayed lines, then live lines.
///
/// Never ends while the stream is alive; drop it to cancel.
#[derive(Debug)]
pub struct LogSubscription {
    replay: VecDeque<LogLine>,
    live: broadcast::Receiver<LogLine>,
}

impl LogSubscription {
    /// Next line, waiting for one if necessary. `None` once every handle to
    /// the stream has been dropped.
    pub async fn next(&mut self) -> Option<LogLine> {
        if let Some(line) = self.replay.pop_front() {
            return Some(line);
        }
        loop {
            match self.live.recv().await {
                Ok(line) => return Some(line),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "log subscriber fell behind; dropped lines");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next line if one is already available.
    pub fn try_next(&mut self) -> Option<LogLine> {
        if let Some(line) = self.replay.pop_front() {
            return Some(line);
        }
        loop {
            match self.live.try_recv() {
                Ok(line) => return Some(line),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "log subscriber fell behind; dropped lines");
                }
                Err(_) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = LogLine> + Send + 'static {
        stream::unfold(self, |mut sub| async move {
            let line = sub.next().await?;
            Some((line, sub))
        })
    }
}
