// src/service/binder.rs

//! Client attachment to a host.
//!
//! Clients never hold the supervisor directly: they go through a [`Binder`],
//! which hands out a [`Binding`] (command sender, log stream, running flag,
//! exit notices).
//! `LocalBinder` is the production implementation and auto-creates a host
//! when none is alive; tests substitute their own binder.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info};

use crate::config::ConfigFile;
use crate::errors::{RelayError, Result};
use crate::exec::{ExitNotice, KeepAlive, NoKeepAlive, ProcessSupervisor};
use crate::fs::FileSystem;
use crate::stream::{LogStream, LogSubscription};

use super::command::ServiceCommand;
use super::host::{HostExit, ServiceHandle, ServiceHost};

/// How a client reaches a host.
pub trait Binder: Send + Sync {
    /// Attach to the host, creating it if needed.
    fn bind(&self) -> Pin<Box<dyn Future<Output = Result<Binding>> + Send + '_>>;
}

/// A client's connection to one host.
#[derive(Debug, Clone)]
pub struct Binding {
    commands: mpsc::Sender<ServiceCommand>,
    logs: LogStream,
    running: watch::Receiver<bool>,
    exits: watch::Receiver<Option<ExitNotice>>,
}

impl Binding {
    pub fn new(
        commands: mpsc::Sender<ServiceCommand>,
        logs: LogStream,
        running: watch::Receiver<bool>,
        exits: watch::Receiver<Option<ExitNotice>>,
    ) -> Self {
        Self {
            commands,
            logs,
            running,
            exits,
        }
    }

    /// Queue a command for the host. Does not wait for its effect.
    pub async fn dispatch(&self, command: ServiceCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RelayError::DispatchFailed("service is not running".to_string()))
    }

    /// Resolves when the host goes away.
    pub async fn disconnected(&self) {
        self.commands.closed().await
    }

    pub fn is_connected(&self) -> bool {
        !self.commands.is_closed()
    }

    pub fn subscribe_logs(&self) -> LogSubscription {
        self.logs.subscribe()
    }

    /// The host's RunningFlag.
    pub fn running(&self) -> watch::Receiver<bool> {
        self.running.clone()
    }

    /// Unsolicited worker exits, as they happen.
    pub fn exits(&self) -> watch::Receiver<Option<ExitNotice>> {
        self.exits.clone()
    }
}

type KeepAliveFactory = Arc<dyn Fn() -> Box<dyn KeepAlive> + Send + Sync>;

/// In-process binder that owns at most one live host.
pub struct LocalBinder {
    config: ConfigFile,
    fs: Arc<dyn FileSystem>,
    keepalive: KeepAliveFactory,
    current: Mutex<Option<ServiceHandle>>,
}

impl LocalBinder {
    pub fn new(config: ConfigFile, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            config,
            fs,
            keepalive: Arc::new(|| Box::new(NoKeepAlive) as Box<dyn KeepAlive>),
            current: Mutex::new(None),
        }
    }

    /// Use `factory` to create the keepalive for each new host.
    pub fn with_keepalive<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn KeepAlive> + Send + Sync + 'static,
    {
        self.keepalive = Arc::new(factory);
        self
    }

    /// Supervisor of the live host, if there is one.
    pub async fn supervisor(&self) -> Option<Arc<ProcessSupervisor>> {
        let current = self.current.lock().await;
        current
            .as_ref()
            .filter(|handle| handle.is_alive())
            .map(|handle| Arc::clone(handle.supervisor()))
    }

    /// Shut the live host down and wait for it. `None` if there was none.
    pub async fn shutdown(&self) -> Option<HostExit> {
        let handle = self.current.lock().await.take()?;
        let exit = handle.shutdown().await;
        info!(?exit, "service host shut down");
        Some(exit)
    }
}

impl Binder for LocalBinder {
    fn bind(&self) -> Pin<Box<dyn Future<Output = Result<Binding>> + Send + '_>> {
        Box::pin(async move {
            let mut current = self.current.lock().await;

            if let Some(handle) = current.as_ref() {
                if handle.is_alive() {
                    debug!("binding to existing service host");
                    return Ok(handle.binding());
                }
            }
            if let Some(finished) = current.take() {
                let exit = finished.join().await;
                debug!(?exit, "previous service host has ended");
            }

            info!("creating service host");
            let handle = ServiceHost::launch(&self.config, Arc::clone(&self.fs), (self.keepalive)())
                .map_err(|e| RelayError::BindFailed(e.to_string()))?;
            let binding = handle.binding();
            *current = Some(handle);
            Ok(binding)
        })
    }
}
