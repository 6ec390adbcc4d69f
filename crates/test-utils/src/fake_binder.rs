use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use relayvisor::errors::{RelayError, Result};
use relayvisor::exec::ExitNotice;
use relayvisor::service::{Binder, Binding, ServiceCommand};
use relayvisor::stream::LogStream;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// A fake binder that:
/// - records every command the client dispatches
/// - lets the test publish log lines and flip the running flag
/// - can fail binds or drop the host on demand.
///
/// No process is ever spawned.
pub struct FakeBinder {
    state: Arc<Mutex<FakeState>>,
    received_tx: mpsc::UnboundedSender<ServiceCommand>,
    received_rx: AsyncMutex<mpsc::UnboundedReceiver<ServiceCommand>>,
}

#[derive(Default)]
struct FakeState {
    fail_bind: bool,
    binds: usize,
    commands: Vec<ServiceCommand>,
    host: Option<FakeHost>,
}

struct FakeHost {
    commands: mpsc::Sender<ServiceCommand>,
    logs: LogStream,
    running: watch::Sender<bool>,
    exits: watch::Sender<Option<ExitNotice>>,
    task: JoinHandle<()>,
}

impl FakeBinder {
    pub fn new() -> Self {
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            received_tx,
            received_rx: AsyncMutex::new(received_rx),
        }
    }

    /// A binder whose binds fail until `set_fail_bind(false)`.
    pub fn failing() -> Self {
        let binder = Self::new();
        binder.set_fail_bind(true);
        binder
    }

    pub fn set_fail_bind(&self, fail: bool) {
        self.state.lock().unwrap().fail_bind = fail;
    }

    pub fn bind_count(&self) -> usize {
        self.state.lock().unwrap().binds
    }

    /// Every command received so far, across hosts.
    pub fn commands(&self) -> Vec<ServiceCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Wait for the next received command.
    pub async fn next_command(&self) -> Option<ServiceCommand> {
        self.received_rx.lock().await.recv().await
    }

    /// Publish a line on the current host's LogStream.
    pub fn publish(&self, line: &str) {
        let state = self.state.lock().unwrap();
        let host = state.host.as_ref().expect("no fake host bound");
        host.logs.publish(line);
    }

    pub fn set_running(&self, running: bool) {
        let state = self.state.lock().unwrap();
        let host = state.host.as_ref().expect("no fake host bound");
        host.running.send_replace(running);
    }

    /// Live receivers of the current host's running flag, i.e. bindings and
    /// the client tasks watching them.
    pub fn running_receivers(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .host
            .as_ref()
            .map_or(0, |host| host.running.receiver_count())
    }

    /// Report an unsolicited worker exit, as a host with a crashed worker
    /// would: the running flag drops first.
    pub fn report_exit(&self, code: Option<i32>) {
        let state = self.state.lock().unwrap();
        let host = state.host.as_ref().expect("no fake host bound");
        host.running.send_replace(false);
        host.exits.send_replace(Some(ExitNotice { code }));
    }

    /// Simulate the host going away: its command receiver is dropped.
    pub fn disconnect(&self) {
        if let Some(host) = self.state.lock().unwrap().host.take() {
            host.task.abort();
        }
    }
}

impl Default for FakeBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    fn spawn(
        state: Arc<Mutex<FakeState>>,
        received: mpsc::UnboundedSender<ServiceCommand>,
    ) -> Self {
        let (commands, mut rx) = mpsc::channel::<ServiceCommand>(16);
        let (running, _) = watch::channel(false);
        let (exits, _) = watch::channel(None);

        let task = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                state.lock().unwrap().commands.push(command.clone());
                let _ = received.send(command);
            }
        });

        Self {
            commands,
            logs: LogStream::new(50),
            running,
            exits,
            task,
        }
    }

    fn binding(&self) -> Binding {
        Binding::new(
            self.commands.clone(),
            self.logs.clone(),
            self.running.subscribe(),
            self.exits.subscribe(),
        )
    }
}

impl Binder for FakeBinder {
    fn bind(&self) -> Pin<Box<dyn Future<Output = Result<Binding>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.binds += 1;

            if state.fail_bind {
                return Err(RelayError::BindFailed("fake bind failure".to_string()));
            }

            if let Some(host) = &state.host {
                if !host.task.is_finished() {
                    return Ok(host.binding());
                }
            }

            let host = FakeHost::spawn(Arc::clone(&self.state), self.received_tx.clone());
            let binding = host.binding();
            state.host = Some(host);
            Ok(binding)
        })
    }
}
