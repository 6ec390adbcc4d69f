// src/control/machine.rs

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::errors::{RelayError, Result};
use crate::exec::ExitNotice;
use crate::service::{Binder, Binding, ServiceCommand};
use crate::stream::LogSubscription;

use super::core::{ControlCore, LogEntry, Status};

/// Async shell around [`ControlCore`].
///
/// Owns the current [`Binding`] and three per-binding tasks: a log collector
/// feeding LogStream lines into the timeline, a disconnect watcher, and a
/// mirror of the host's RunningFlag and exit notices. Every state change
/// still goes through the core, so observers see one ordered history.
pub struct ControlStateMachine<B: Binder> {
    binder: Arc<B>,
    inner: Arc<Inner>,
    /// Abort handles of the latest session's tasks, reachable from `Drop`
    /// without the async session lock.
    tasks: Mutex<Vec<AbortHandle>>,
}

struct Inner {
    core: Mutex<ControlCore>,
    status: watch::Sender<Status>,
    /// Bumped after every core update.
    revision: watch::Sender<u64>,
    session: AsyncMutex<Option<Session>>,
    next_epoch: AtomicU64,
}

/// Everything tied to one successful bind.
struct Session {
    epoch: u64,
    binding: Binding,
    cancel: watch::Sender<bool>,
    collector: JoinHandle<()>,
    mirror: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

impl<B: Binder> fmt::Debug for ControlStateMachine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlStateMachine")
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl<B: Binder> ControlStateMachine<B> {
    pub fn new(binder: Arc<B>, log_capacity: usize) -> Self {
        let (status, _) = watch::channel(Status::Initial);
        let (revision, _) = watch::channel(0);
        Self {
            binder,
            inner: Arc::new(Inner {
                core: Mutex::new(ControlCore::new(log_capacity)),
                status,
                revision,
                session: AsyncMutex::new(None),
                next_epoch: AtomicU64::new(0),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Attach to the host. Any previous binding is released first.
    pub async fn bind(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        self.inner.update(ControlCore::binding_started);

        let binding = match self.binder.bind().await {
            Ok(binding) => binding,
            Err(e) => {
                warn!(error = %e, "bind failed");
                self.inner.update(|core| core.bind_failed(&e.to_string()));
                return Err(e);
            }
        };

        if let Some(previous) = session.take() {
            previous.close().await;
        }
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);

        // Subscribe before reporting success so no line published after the
        // bind is missed.
        let subscription = binding.subscribe_logs();
        self.inner.update(ControlCore::bind_succeeded);
        info!(epoch, "bound to service");

        let opened = Session::open(Arc::clone(&self.inner), binding, subscription, epoch);
        *self.tasks.lock().unwrap_or_else(PoisonError::into_inner) = opened.abort_handles();
        *session = Some(opened);
        Ok(())
    }

    /// Ask the host to start the worker with `arguments`.
    ///
    /// Blank arguments are rejected locally. Binds first if there is no live
    /// binding. Returns once the command is queued; the worker may not be
    /// running yet.
    pub async fn start(&self, arguments: &str) -> Result<()> {
        self.inner.update(|core| core.request_start(arguments))?;

        let binding = match self.live_binding().await {
            Some(binding) => binding,
            None => {
                debug!("no live binding; binding before start");
                self.bind().await?;
                self.live_binding()
                    .await
                    .ok_or_else(|| RelayError::BindFailed("service went away".to_string()))?
            }
        };

        match binding.dispatch(ServiceCommand::start(arguments)).await {
            Ok(()) => {
                self.inner.update(ControlCore::start_dispatched);
                Ok(())
            }
            Err(e) => {
                self.inner.update(|core| core.dispatch_failed("start", &e));
                Err(e)
            }
        }
    }

    /// Ask the host to stop the worker. Status goes to Stopping immediately
    /// and to Ready once the command is queued.
    pub async fn stop(&self) -> Result<()> {
        let Some(binding) = self.current_binding().await else {
            let e = RelayError::DispatchFailed("not bound to service".to_string());
            self.inner.update(|core| core.dispatch_failed("stop", &e));
            return Err(e);
        };

        self.inner.update(ControlCore::request_stop);
        match binding.dispatch(ServiceCommand::Stop).await {
            Ok(()) => {
                self.inner.update(ControlCore::stop_dispatched);
                Ok(())
            }
            Err(e) => {
                self.inner.update(|core| core.dispatch_failed("stop", &e));
                Err(e)
            }
        }
    }

    /// Release the binding without touching status. Lines already delivered
    /// are kept in the timeline.
    pub async fn unbind(&self) {
        if let Some(session) = self.inner.session.lock().await.take() {
            info!(epoch = session.epoch, "unbinding from service");
            session.close().await;
        }
    }

    pub async fn is_bound(&self) -> bool {
        self.inner.session.lock().await.is_some()
    }

    pub fn status(&self) -> Status {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.inner.status.subscribe()
    }

    /// Receiver that changes after every timeline or status update.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.core().entries_after(None)
    }

    /// Entries with a sequence number greater than `seq`, or all of them.
    pub fn log_entries_since(&self, seq: Option<u64>) -> Vec<LogEntry> {
        self.inner.core().entries_after(seq)
    }

    /// Last observed RunningFlag, or the optimistic value after a dispatch.
    pub fn is_service_running(&self) -> bool {
        self.inner.core().service_running()
    }

    async fn current_binding(&self) -> Option<Binding> {
        let session = self.inner.session.lock().await;
        session.as_ref().map(|s| s.binding.clone())
    }

    async fn live_binding(&self) -> Option<Binding> {
        self.current_binding()
            .await
            .filter(|binding| binding.is_connected())
    }
}

impl<B: Binder> Drop for ControlStateMachine<B> {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl Inner {
    fn core(&self) -> MutexGuard<'_, ControlCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to the core, then notify status and change watchers.
    fn update<R>(&self, f: impl FnOnce(&mut ControlCore) -> R) -> R {
        let (result, status) = {
            let mut core = self.core();
            let result = f(&mut core);
            (result, core.status().clone())
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                debug!(from = ?current, to = ?status, "status changed");
                *current = status;
                true
            }
        });
        self.revision.send_modify(|rev| *rev += 1);
        result
    }

    async fn on_disconnect(&self, epoch: u64) {
        let mut slot = self.session.lock().await;
        match slot.as_ref() {
            Some(session) if session.epoch == epoch => {}
            _ => {
                debug!(epoch, "stale disconnect ignored");
                return;
            }
        }
        let Some(session) = slot.take() else {
            return;
        };
        session.finish_after_disconnect().await;

        if self.update(ControlCore::disconnected) {
            warn!(epoch, "service disconnected unexpectedly");
        } else {
            info!(epoch, "service disconnected");
        }
    }
}

impl Session {
    fn open(
        inner: Arc<Inner>,
        binding: Binding,
        subscription: LogSubscription,
        epoch: u64,
    ) -> Self {
        let (cancel, cancel_rx) = watch::channel(false);

        let collector = tokio::spawn(collect_logs(
            Arc::clone(&inner),
            subscription,
            cancel_rx.clone(),
        ));
        let mirror = tokio::spawn(mirror_running(
            Arc::clone(&inner),
            binding.running(),
            binding.exits(),
            cancel_rx.clone(),
        ));
        let watcher = tokio::spawn(watch_disconnect(inner, binding.clone(), epoch, cancel_rx));

        Self {
            epoch,
            binding,
            cancel,
            collector,
            mirror,
            watcher,
        }
    }

    /// Cancel the per-binding tasks and wait for the collector to flush.
    async fn close(self) {
        self.cancel.send_replace(true);
        self.mirror.abort();
        self.watcher.abort();
        if let Err(e) = self.collector.await {
            if !e.is_cancelled() {
                warn!(error = %e, "log collector task failed");
            }
        }
    }

    /// Like `close`, but called from the watcher task itself. The mirror is
    /// awaited so an exit notice sent before the host went away is applied
    /// ahead of the disconnect.
    async fn finish_after_disconnect(self) {
        self.cancel.send_replace(true);
        for (name, task) in [("log collector", self.collector), ("running mirror", self.mirror)] {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, task = name, "session task failed");
                }
            }
        }
    }

    fn abort_handles(&self) -> Vec<AbortHandle> {
        vec![
            self.collector.abort_handle(),
            self.mirror.abort_handle(),
            self.watcher.abort_handle(),
        ]
    }
}

/// Forward LogStream lines into the timeline. On cancel, lines already
/// buffered are drained before returning.
async fn collect_logs(
    inner: Arc<Inner>,
    mut subscription: LogSubscription,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.changed() => {
                while let Some(line) = subscription.try_next() {
                    inner.update(|core| core.push_log(line.as_str()));
                }
                break;
            }

            line = subscription.next() => match line {
                Some(line) => inner.update(|core| core.push_log(line.as_str())),
                None => break,
            },
        }
    }
    debug!("log collector finished");
}

/// Mirror the RunningFlag and turn unsolicited exits into an Error status.
async fn mirror_running(
    inner: Arc<Inner>,
    mut running: watch::Receiver<bool>,
    mut exits: watch::Receiver<Option<ExitNotice>>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let value = *running.borrow_and_update();
        inner.update(|core| core.set_service_running(value));
        report_exit(&inner, &mut exits);

        tokio::select! {
            _ = cancel.changed() => break,
            changed = running.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = exits.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    // The host may be gone; a notice it sent last is still unread.
    report_exit(&inner, &mut exits);
}

fn report_exit(inner: &Inner, exits: &mut watch::Receiver<Option<ExitNotice>>) {
    let notice = {
        let latest = exits.borrow_and_update();
        if !latest.has_changed() {
            return;
        }
        *latest
    };
    let Some(notice) = notice else {
        return;
    };
    let error = RelayError::from(notice);
    if inner.update(|core| core.worker_exited(&error)) {
        warn!(error = %error, "worker stopped unexpectedly");
    }
}

async fn watch_disconnect(
    inner: Arc<Inner>,
    binding: Binding,
    epoch: u64,
    mut cancel: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = cancel.changed() => {}
        _ = binding.disconnected() => inner.on_disconnect(epoch).await,
    }
}
