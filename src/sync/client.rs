//! Async driver for the session state machine.
//!
//! [`SyncClient::spawn`] moves the machine into a dedicated task and returns a
//! cloneable [`SyncHandle`]. Every input, local or remote, becomes a
//! [`Command`] on one channel, so the machine sees a single serialized stream
//! of mutations. Timers and confirmation checks hold only a weak sender and
//! post their results back through the same channel.

use crate::protocol::{ChallengeEvent, Codec, EndPayload, StartPayload, Tick};
use crate::sync::confirm::{BlockingConfirmationExecutor, ConfirmationVerdict, EncounterProbe};
use crate::sync::machine::{Collaborators, SessionStateMachine};
use crate::sync::notify::StatusSink;
use crate::sync::scheduler::{TimeoutScheduler, Timer, TokioScheduler};
use crate::sync::types::{SyncConfig, SyncError, SyncSnapshot};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Inputs processed by the client task, in arrival order
#[derive(Debug)]
pub enum Command {
    LocalEvent { tick: Tick, event: ChallengeEvent },
    Tick(Tick),
    Message(Vec<u8>),
    Disconnect(String),
    TimerFired(Timer),
    ConfirmationComputed(ConfirmationVerdict),
    SetUsername(String),
    Snapshot(oneshot::Sender<SyncSnapshot>),
    Shutdown,
}

/// Handle used by detectors and the transport owner to feed the client.
///
/// Every method except [`SyncHandle::snapshot`] is non-blocking and safe to
/// call from the tick path.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SyncHandle {
    fn submit(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::ClientClosed)
    }

    pub fn on_local_event(&self, tick: Tick, event: ChallengeEvent) -> Result<(), SyncError> {
        self.submit(Command::LocalEvent { tick, event })
    }

    pub fn start(&self, tick: Tick, payload: StartPayload) -> Result<(), SyncError> {
        self.on_local_event(tick, ChallengeEvent::Start(payload))
    }

    pub fn end(&self, tick: Tick, payload: EndPayload) -> Result<(), SyncError> {
        self.on_local_event(tick, ChallengeEvent::End(payload))
    }

    pub fn on_tick(&self, tick: Tick) -> Result<(), SyncError> {
        self.submit(Command::Tick(tick))
    }

    pub fn on_message(&self, bytes: Vec<u8>) -> Result<(), SyncError> {
        self.submit(Command::Message(bytes))
    }

    pub fn on_disconnect(&self, reason: impl Into<String>) -> Result<(), SyncError> {
        self.submit(Command::Disconnect(reason.into()))
    }

    pub fn set_username(&self, username: impl Into<String>) -> Result<(), SyncError> {
        self.submit(Command::SetUsername(username.into()))
    }

    /// Current state, observed after every previously submitted command
    pub async fn snapshot(&self) -> Result<SyncSnapshot, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Snapshot(tx))?;
        rx.await.map_err(|_| SyncError::ClientClosed)
    }

    /// Stop the client task after it drains pending commands
    pub fn shutdown(&self) -> Result<(), SyncError> {
        self.submit(Command::Shutdown)
    }
}

/// Constructor for the client task
pub struct SyncClient;

impl SyncClient {
    /// Spawn the client on the current tokio runtime
    pub fn spawn(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        sink: Arc<dyn StatusSink>,
        probe: Arc<dyn EncounterProbe>,
    ) -> (SyncHandle, JoinHandle<()>) {
        let (commands, mut receiver) = mpsc::unbounded_channel();

        let timer_tx = commands.downgrade();
        let scheduler = Arc::new(TokioScheduler::new(move |timer| {
            if let Some(tx) = timer_tx.upgrade() {
                let _ = tx.send(Command::TimerFired(timer));
            }
        }));

        let verdict_tx = commands.downgrade();
        let confirmations = Arc::new(BlockingConfirmationExecutor::new(
            probe.clone(),
            move |verdict| {
                if let Some(tx) = verdict_tx.upgrade() {
                    let _ = tx.send(Command::ConfirmationComputed(verdict));
                }
            },
        ));

        let io = Collaborators {
            transport,
            codec,
            scheduler: scheduler.clone(),
            sink,
            probe,
            confirmations,
        };
        let mut machine = SessionStateMachine::new(config, io);

        let task = tokio::spawn(async move {
            info!("Sync client started");
            while let Some(command) = receiver.recv().await {
                if !dispatch(&mut machine, command) {
                    break;
                }
            }
            scheduler.cancel_all();
            info!("Sync client stopped");
        });

        (SyncHandle { commands }, task)
    }
}

/// Apply one command. Returns false when the client should stop.
fn dispatch(machine: &mut SessionStateMachine, command: Command) -> bool {
    match command {
        Command::LocalEvent { tick, event } => machine.on_local_event(tick, event),
        Command::Tick(tick) => machine.on_tick(tick),
        Command::Message(bytes) => machine.on_message(&bytes),
        Command::Disconnect(reason) => machine.on_disconnect(&reason),
        Command::TimerFired(timer) => machine.on_timer(timer),
        Command::ConfirmationComputed(verdict) => machine.apply_confirmation(verdict),
        Command::SetUsername(username) => machine.set_local_username(username),
        Command::Snapshot(reply) => {
            let _ = reply.send(machine.snapshot());
        }
        Command::Shutdown => {
            debug!("Sync client shutting down");
            return false;
        }
    }
    true
}
