// src/lib.rs

pub mod address;
pub mod cli;
pub mod config;
pub mod control;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod resolver;
pub mod service;
pub mod stream;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::address::ServerAddress;
use crate::cli::{CliArgs, Command};
use crate::config::{load_effective, ConfigFile};
use crate::control::{ControlStateMachine, Status};
use crate::fs::RealFileSystem;
use crate::resolver::BinaryResolver;
use crate::service::{Binder, LocalBinder, ServiceCommand};
use crate::types::SupervisorPhase;

/// Slack on top of the configured stop timeouts when waiting for the worker
/// to wind down on exit.
const EXIT_SLACK: Duration = Duration::from_millis(500);

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::CheckAddress { address } => check_address(&address),
        Command::Resolve => {
            let cfg = load_effective(args.config.as_deref())?;
            resolve_binary(&cfg)
        }
        Command::Run { server, args: extra } => {
            let cfg = load_effective(args.config.as_deref())?;
            let arguments = worker_arguments(server.as_deref(), &extra)?;
            run_session(cfg, arguments).await
        }
        Command::Serve => {
            let cfg = load_effective(args.config.as_deref())?;
            serve(cfg).await
        }
    }
}

/// Build the worker argument string: `-server HOST:PORT` (validated) followed
/// by `extra`, space separated.
pub fn worker_arguments(server: Option<&str>, extra: &[String]) -> Result<String> {
    let mut parts = Vec::with_capacity(extra.len() + 2);
    if let Some(server) = server {
        let address: ServerAddress = server.parse()?;
        parts.push("-server".to_string());
        parts.push(address.to_string());
    }
    parts.extend(extra.iter().cloned());
    Ok(parts.join(" "))
}

fn check_address(address: &str) -> Result<()> {
    if crate::address::validate_server_address(address) {
        println!("valid");
        Ok(())
    } else {
        println!("invalid");
        bail!("invalid server address: {address}")
    }
}

fn resolve_binary(cfg: &ConfigFile) -> Result<()> {
    let resolver = BinaryResolver::new(cfg.candidate_layout(), Arc::new(RealFileSystem));
    debug!(candidates = ?resolver.candidates(), "resolving worker binary");

    let binary = resolver.resolve()?;
    match binary.abi() {
        Some(abi) => println!("{} ({abi})", binary.path().display()),
        None => println!("{}", binary.path().display()),
    }
    Ok(())
}

/// Bind, start the worker, and print the timeline until Ctrl-C or an error.
async fn run_session(cfg: ConfigFile, arguments: String) -> Result<()> {
    let binder = Arc::new(LocalBinder::new(cfg.clone(), Arc::new(RealFileSystem)));
    let machine = ControlStateMachine::new(Arc::clone(&binder), cfg.client.log_capacity);
    let mut console = Console::default();
    let mut changes = machine.subscribe_changes();

    let started = async {
        machine.bind().await?;
        machine.start(&arguments).await
    };
    if let Err(e) = started.await {
        console.flush(&machine);
        binder.shutdown().await;
        return Err(e.into());
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        console.flush(&machine);
        if let Status::Error(message) = machine.status() {
            binder.shutdown().await;
            bail!("session ended: {message}");
        }

        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                }
                info!("interrupt received; stopping");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    wind_down(&machine, &binder, &cfg, &mut console).await;
    Ok(())
}

/// Relay JSON control commands from stdin until EOF or Ctrl-C.
async fn serve(cfg: ConfigFile) -> Result<()> {
    let binder = Arc::new(LocalBinder::new(cfg.clone(), Arc::new(RealFileSystem)));
    let machine = ControlStateMachine::new(Arc::clone(&binder), cfg.client.log_capacity);
    let mut console = Console::default();
    let mut changes = machine.subscribe_changes();

    if let Err(e) = machine.bind().await {
        console.flush(&machine);
        return Err(e.into());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        console.flush(&machine);

        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received; stopping");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let outcome = match ServiceCommand::from_json(&line) {
                    Ok(ServiceCommand::Start { arguments }) => {
                        machine.start(arguments.as_deref().unwrap_or_default()).await
                    }
                    Ok(ServiceCommand::Stop) => machine.stop().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = outcome {
                    warn!(error = %e, command = %line, "control command failed");
                }
            }
        }
    }

    wind_down(&machine, &binder, &cfg, &mut console).await;
    Ok(())
}

/// Stop the worker, wait for its final lines, then tear the host down.
async fn wind_down<B: Binder>(
    machine: &ControlStateMachine<B>,
    binder: &LocalBinder,
    cfg: &ConfigFile,
    console: &mut Console,
) {
    if let Some(supervisor) = binder.supervisor().await {
        if let Err(e) = machine.stop().await {
            warn!(error = %e, "stop on exit failed");
        }

        let options = cfg.supervisor_options();
        let limit = options.graceful_timeout + options.drain_grace + EXIT_SLACK;
        let mut phase = supervisor.phase();
        let settled = async {
            phase
                .wait_for(|p| matches!(p, SupervisorPhase::Idle | SupervisorPhase::ShuttingDown))
                .await
                .map(|_| ())
        };
        if tokio::time::timeout(limit, settled).await.is_err() {
            warn!("worker did not settle after stop; shutting down anyway");
        }
    }

    machine.unbind().await;
    console.flush(machine);
    if let Some(exit) = binder.shutdown().await {
        debug!(?exit, "host ended");
    }
}

/// Prints timeline entries and status changes to stdout as they appear.
#[derive(Default)]
struct Console {
    last_seq: Option<u64>,
    last_status: Option<Status>,
}

impl Console {
    fn flush<B: Binder>(&mut self, machine: &ControlStateMachine<B>) {
        for entry in machine.log_entries_since(self.last_seq) {
            println!("{}", entry.text);
            self.last_seq = Some(entry.seq);
        }
        let status = machine.status();
        if self.last_status.as_ref() != Some(&status) {
            println!("[{}]", status.label());
            self.last_status = Some(status);
        }
    }
}
