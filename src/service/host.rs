// src/service/host.rs

//! The host context that owns a supervisor for one session.
//!
//! A host is created on first bind, processes [`ServiceCommand`]s in order,
//! and ends when it is asked to shut down, when every client handle is gone,
//! or when the supervisor reports a fatal condition. Ending always runs the
//! supervisor's `shutdown`, and only then drops the command receiver, so a
//! client that sees the disconnect has already been sent every final line.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConfigFile;
use crate::errors::Result;
use crate::exec::{HaltRequest, KeepAlive, ProcessSupervisor};
use crate::fs::FileSystem;
use crate::resolver::BinaryResolver;
use crate::stream::LogStream;

use super::binder::Binding;
use super::command::ServiceCommand;

const COMMAND_BUFFER: usize = 16;

/// Why a host stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostExit {
    /// The supervisor asked for the session to end.
    Halted(HaltRequest),
    /// A start attempt failed to resolve or spawn the worker.
    StartFailed(String),
    ShutdownRequested,
    /// Every command sender was dropped.
    ClientsGone,
}

pub struct ServiceHost {
    supervisor: Arc<ProcessSupervisor>,
    commands: mpsc::Receiver<ServiceCommand>,
    halts: mpsc::UnboundedReceiver<HaltRequest>,
    shutdown: watch::Receiver<bool>,
}

/// Owner's handle to a running host.
pub struct ServiceHandle {
    commands: mpsc::Sender<ServiceCommand>,
    supervisor: Arc<ProcessSupervisor>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<HostExit>,
}

impl ServiceHost {
    /// Build a supervisor from `config` and run a host for it on the Tokio
    /// runtime.
    pub fn launch(
        config: &ConfigFile,
        fs: Arc<dyn FileSystem>,
        keepalive: Box<dyn KeepAlive>,
    ) -> Result<ServiceHandle> {
        let resolver = BinaryResolver::new(config.candidate_layout(), fs);
        let logs = LogStream::new(config.supervisor.replay);
        let (supervisor, halts) =
            ProcessSupervisor::new(resolver, logs, config.supervisor_options(), keepalive)?;
        Ok(Self::spawn(Arc::new(supervisor), halts))
    }

    /// Run a host around an already constructed supervisor.
    pub fn spawn(
        supervisor: Arc<ProcessSupervisor>,
        halts: mpsc::UnboundedReceiver<HaltRequest>,
    ) -> ServiceHandle {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (shutdown_tx, shutdown) = watch::channel(false);

        let host = ServiceHost {
            supervisor: Arc::clone(&supervisor),
            commands,
            halts,
            shutdown,
        };
        let task = tokio::spawn(host.run());

        ServiceHandle {
            commands: commands_tx,
            supervisor,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(mut self) -> HostExit {
        info!("service host started");
        self.supervisor.logs().publish("Service created.");

        let exit = loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => break HostExit::ShutdownRequested,

                Some(halt) = self.halts.recv() => break HostExit::Halted(halt),

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(exit) = self.handle(command).await {
                            break exit;
                        }
                    }
                    None => break HostExit::ClientsGone,
                },
            }
        };

        info!(?exit, "service host stopping");
        self.supervisor.shutdown().await;
        exit
    }

    async fn handle(&self, command: ServiceCommand) -> Option<HostExit> {
        debug!(?command, "host received command");
        let logs = self.supervisor.logs();

        match command {
            ServiceCommand::Stop => {
                info!("received stop command");
                logs.publish("Received STOP command.");
                self.supervisor.stop().await;
                None
            }
            ServiceCommand::Start { arguments: None } => {
                warn!("start command received without arguments");
                logs.publish("Error: Start command missing required arguments.");
                self.supervisor.stop().await;
                None
            }
            ServiceCommand::Start {
                arguments: Some(arguments),
            } => {
                info!("processing start command");
                logs.publish("Received start request:");
                logs.publish(format!("  Args: [{arguments}]"));
                match self.supervisor.start(&arguments).await {
                    Ok(()) => None,
                    Err(e) => Some(HostExit::StartFailed(e.to_string())),
                }
            }
        }
    }
}

impl ServiceHandle {
    /// A fresh client binding to this host.
    pub fn binding(&self) -> Binding {
        Binding::new(
            self.commands.clone(),
            self.supervisor.logs().clone(),
            self.supervisor.running(),
            self.supervisor.exits(),
        )
    }

    /// False once the host loop has ended.
    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for the host loop to end.
    pub async fn join(self) -> HostExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!(error = %e, "service host task failed");
                HostExit::ShutdownRequested
            }
        }
    }

    pub async fn shutdown(self) -> HostExit {
        self.request_shutdown();
        self.join().await
    }
}
