//! # Loopback Simulation
//!
//! Runs a scripted challenge through a real [`SyncClient`] against an
//! in-process recording server connected by a [`ChannelTransport`].
//!
//! ```text
//! ┌──────────────┐  ChallengeEvent   ┌────────────┐  frames   ┌────────────────┐
//! │ tick driver  │ ────────────────▶ │ SyncClient │ ────────▶ │ LoopbackServer │
//! │ (run)        │                   │  (actor)   │ ◀──────── │                │
//! └──────────────┘                   └────────────┘ on_message└────────────────┘
//! ```
//!
//! The server can be told to drop start acknowledgments, never acknowledge
//! the end, and ask for a confirmation after the driver drops the connection.
//! The run produces a [`SimulationReport`] with every client message the
//! server saw and every notification the client raised.

use crate::cli::{ClientConfig, SimulateConfig};
use crate::env;
use crate::protocol::{
    ChallengeEvent, ChallengeKind, ChallengeMode, ClientMessage, Codec, ConfirmationRequest,
    EndPayload, GameplayEvent, JsonCodec, MetadataUpdate, ServerErrorKind, ServerMessage,
    SessionId, Stage, StageStatus, StageUpdate, StartPayload, Tick,
};
use crate::sync::{
    EncounterSnapshot, Notification, SharedEncounter, Status, StatusSink, SyncClient, SyncHandle,
    SyncConfig, SyncSnapshot, TracingSink,
};
use crate::transport::{ChannelTransport, TransportEvent};
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Poll interval while waiting for the client to settle
const SETTLE_POLL: Duration = Duration::from_millis(25);

/// Extra time allowed on top of the configured timeouts
const SETTLE_MARGIN: Duration = Duration::from_secs(1);

/// Result of a simulation run
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub seed: u64,
    /// Client messages in the order the server received them
    pub client_messages: Vec<ClientMessage>,
    pub notifications: Vec<Notification>,
    /// Bulk events the server accepted into an open session
    pub events_recorded: usize,
    /// Messages the server rejected for naming the wrong session
    pub rejected_messages: usize,
    /// Reason given when the client closed the transport, if it did
    pub close_reason: Option<String>,
    pub final_snapshot: SyncSnapshot,
}

impl SimulationReport {
    /// Number of client messages with the given wire name
    pub fn count(&self, name: &str) -> usize {
        self.client_messages
            .iter()
            .filter(|m| m.name() == name)
            .count()
    }

    pub fn print(&self, verbose: bool) {
        println!("Simulation finished (seed {})", self.seed);
        println!();

        if verbose {
            println!("Client messages:");
            for (i, message) in self.client_messages.iter().enumerate() {
                println!("  {:>3}. {}", i + 1, describe(message));
            }
            println!();
            println!("Notifications:");
            for notification in &self.notifications {
                println!("  - {:?}", notification);
            }
            println!();
        }

        for name in [
            "start_request",
            "end_request",
            "update_request",
            "event_batch",
            "confirmation_response",
            "pong",
        ] {
            println!("  {:<22} {}", name, self.count(name));
        }
        println!("  {:<22} {}", "events recorded", self.events_recorded);
        println!("  {:<22} {}", "rejected messages", self.rejected_messages);
        if let Some(reason) = &self.close_reason {
            println!("  {:<22} {}", "closed by client", reason);
        }
        println!();
        println!(
            "Final status: {} (last request id {})",
            self.final_snapshot.status, self.final_snapshot.last_request_id
        );
    }
}

fn describe(message: &ClientMessage) -> String {
    match message {
        ClientMessage::StartRequest {
            request_id, kind, ..
        } => format!("start_request #{} {:?}", request_id, kind),
        ClientMessage::EndRequest {
            request_id,
            session_id,
            challenge_ticks,
            ..
        } => format!(
            "end_request #{} session={} ticks={}",
            request_id, session_id, challenge_ticks
        ),
        ClientMessage::UpdateRequest {
            session_id,
            mode,
            stage_update,
        } => format!(
            "update_request session={} mode={:?} stage={:?}",
            session_id, mode, stage_update
        ),
        ClientMessage::EventBatch { session_id, events } => {
            let first = events.first().map(|e| e.tick);
            let last = events.last().map(|e| e.tick);
            format!(
                "event_batch session={} events={} ticks={:?}..={:?}",
                session_id,
                events.len(),
                first,
                last
            )
        }
        ClientMessage::ConfirmationResponse {
            session_id,
            valid,
            spectator,
        } => format!(
            "confirmation_response session={} valid={} spectator={:?}",
            session_id, valid, spectator
        ),
        ClientMessage::Pong => "pong".to_string(),
    }
}

/// Sink that logs and keeps every notification
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

impl StatusSink for CollectingSink {
    fn notify(&self, notification: Notification) {
        TracingSink.notify(notification.clone());
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(notification);
        }
    }
}

/// Out-of-band instructions for the server
#[derive(Debug)]
pub enum ServerControl {
    /// The client reconnected; confirm any session still open
    Reconnected,
    /// Report an authentication failure to the client
    RejectAuthentication,
}

/// Server-side behavior knobs
#[derive(Debug, Clone, Default)]
pub struct ServerBehavior {
    /// Start requests to ignore before acknowledging one
    pub drop_start_acks: u32,
    /// Never answer end requests
    pub skip_end_ack: bool,
    /// Send a ping whenever a session opens
    pub ping_on_open: bool,
}

#[derive(Debug, Clone)]
struct OpenSession {
    id: SessionId,
    kind: ChallengeKind,
    stage: Stage,
    party: Vec<String>,
}

/// What the server saw over one run
#[derive(Debug, Clone, Default)]
pub struct ServerLog {
    pub client_messages: Vec<ClientMessage>,
    pub events_recorded: usize,
    pub rejected_messages: usize,
    pub close_reason: Option<String>,
}

/// Minimal in-process recording server
pub struct LoopbackServer {
    behavior: ServerBehavior,
    codec: JsonCodec,
    client: SyncHandle,
    username: String,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    control: mpsc::UnboundedReceiver<ServerControl>,
    dropped_starts: u32,
    session: Option<OpenSession>,
    log: ServerLog,
}

impl LoopbackServer {
    pub fn new(
        behavior: ServerBehavior,
        client: SyncHandle,
        username: impl Into<String>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
        control: mpsc::UnboundedReceiver<ServerControl>,
    ) -> Self {
        Self {
            behavior,
            codec: JsonCodec,
            client,
            username: username.into(),
            inbound,
            control,
            dropped_starts: 0,
            session: None,
            log: ServerLog::default(),
        }
    }

    /// Serve until every transport handle is dropped
    pub async fn run(mut self) -> ServerLog {
        loop {
            tokio::select! {
                event = self.inbound.recv() => match event {
                    Some(TransportEvent::Frame(bytes)) => self.on_frame(&bytes),
                    Some(TransportEvent::Closed(reason)) => {
                        info!("Client closed the connection: {}", reason);
                        self.log.close_reason = Some(reason);
                        self.session = None;
                    }
                    None => break,
                },
                Some(control) = self.control.recv() => self.on_control(control),
            }
        }
        debug!("Loopback server stopped");
        self.log
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        let message = match self.codec.decode_client(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!("Server received an undecodable frame: {}", e);
                return;
            }
        };
        debug!("Server received {}", message.name());
        self.log.client_messages.push(message.clone());

        match message {
            ClientMessage::StartRequest {
                request_id,
                kind,
                stage,
                party,
                ..
            } => {
                if self.dropped_starts < self.behavior.drop_start_acks {
                    self.dropped_starts += 1;
                    info!(
                        "Dropping start request #{} ({}/{})",
                        request_id, self.dropped_starts, self.behavior.drop_start_acks
                    );
                    return;
                }
                let id = uuid::Uuid::new_v4().to_string();
                info!("Opened session {} for request #{}", id, request_id);
                self.session = Some(OpenSession {
                    id: id.clone(),
                    kind,
                    stage,
                    party,
                });
                self.reply(ServerMessage::StartResponse {
                    request_id,
                    session_id: Some(id),
                    error: None,
                });
                if self.behavior.ping_on_open {
                    self.reply(ServerMessage::Ping);
                }
            }
            ClientMessage::EndRequest {
                request_id,
                session_id,
                ..
            } => {
                if !self.is_open(&session_id) {
                    self.reject(&session_id);
                    return;
                }
                self.session = None;
                if self.behavior.skip_end_ack {
                    info!("Closed session {} without acknowledging", session_id);
                    return;
                }
                self.reply(ServerMessage::EndResponse { request_id });
            }
            ClientMessage::UpdateRequest {
                session_id,
                stage_update,
                ..
            } => {
                if !self.is_open(&session_id) {
                    self.reject(&session_id);
                    return;
                }
                if let Some(update) = stage_update
                    && let Some(session) = self.session.as_mut()
                    && update.stage > session.stage
                {
                    session.stage = update.stage;
                }
            }
            ClientMessage::EventBatch { session_id, events } => {
                if !self.is_open(&session_id) {
                    self.reject(&session_id);
                    return;
                }
                self.log.events_recorded += events.len();
            }
            ClientMessage::ConfirmationResponse {
                session_id, valid, ..
            } => {
                if !valid && self.is_open(&session_id) {
                    info!("Client disowned session {}", session_id);
                    self.session = None;
                }
            }
            ClientMessage::Pong => {}
        }
    }

    fn on_control(&mut self, control: ServerControl) {
        match control {
            ServerControl::Reconnected => {
                if let Some(session) = &self.session {
                    let request = ConfirmationRequest {
                        session_id: session.id.clone(),
                        kind: session.kind,
                        stage: session.stage,
                        party: session.party.clone(),
                        username: self.username.clone(),
                    };
                    self.reply(ServerMessage::ConfirmationRequest(request));
                }
            }
            ServerControl::RejectAuthentication => {
                self.reply(ServerMessage::ServerError {
                    kind: ServerErrorKind::Unauthenticated,
                    session_id: None,
                    message: Some("session token expired".to_string()),
                    username: None,
                });
            }
        }
    }

    fn is_open(&self, session_id: &str) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session_id)
    }

    fn reject(&mut self, session_id: &str) {
        self.log.rejected_messages += 1;
        self.reply(ServerMessage::ServerError {
            kind: ServerErrorKind::BadRequest,
            session_id: Some(session_id.to_string()),
            message: Some("no such session".to_string()),
            username: None,
        });
    }

    fn reply(&self, message: ServerMessage) {
        match self.codec.encode_server(&message) {
            Ok(bytes) => {
                if self.client.on_message(bytes).is_err() {
                    debug!("Client gone, dropping server reply");
                }
            }
            Err(e) => warn!("Failed to encode server reply: {}", e),
        }
    }
}

/// Run the scripted challenge described by `simulate` using the timing in
/// `client_config`
pub async fn run(
    simulate: &SimulateConfig,
    client_config: &ClientConfig,
) -> Result<SimulationReport> {
    let seed = simulate.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let username = client_config
        .username
        .clone()
        .unwrap_or_else(|| env::defaults::SIMULATION_USERNAME.to_string());

    let (transport, inbound) = ChannelTransport::new();
    let (control, control_rx) = mpsc::unbounded_channel();
    let sink = CollectingSink::new();
    let encounter = Arc::new(SharedEncounter::new());

    let (handle, client_task) = SyncClient::spawn(
        client_config.sync.clone(),
        Arc::new(transport.clone()),
        Arc::new(JsonCodec),
        Arc::new(sink.clone()),
        encounter.clone(),
    );
    handle.set_username(username.clone())?;

    let behavior = ServerBehavior {
        drop_start_acks: simulate.drop_start_acks,
        skip_end_ack: simulate.skip_end_ack,
        ping_on_open: true,
    };
    let server = LoopbackServer::new(
        behavior,
        handle.clone(),
        username.clone(),
        inbound,
        control_rx,
    );
    let server_task = tokio::spawn(server.run());

    let payload = StartPayload {
        kind: ChallengeKind::TheatreOfBlood,
        mode: ChallengeMode::Regular,
        stage: Stage(1),
        party: vec![username.clone(), "bob".to_string(), "carol".to_string()],
        spectator: false,
    };
    encounter.set(EncounterSnapshot {
        kind: payload.kind,
        stage: payload.stage,
        party: payload.party.clone(),
    });
    handle.start(0, payload.clone())?;
    info!("Simulating {} ticks (seed {})", simulate.ticks, seed);

    let tick_interval = Duration::from_millis(simulate.tick_ms);
    let midpoint = simulate.ticks / 2;
    for tick in 0..simulate.ticks {
        handle.on_tick(tick)?;

        for _ in 0..simulate.events_per_tick {
            handle.on_local_event(tick, random_event(&mut rng, tick).into())?;
        }

        if tick == midpoint && tick > 0 {
            let stage = Stage(2);
            encounter.set(EncounterSnapshot {
                kind: payload.kind,
                stage,
                party: payload.party.clone(),
            });
            handle.on_local_event(
                tick,
                ChallengeEvent::Metadata(MetadataUpdate {
                    mode: None,
                    stage_update: Some(StageUpdate {
                        stage,
                        status: StageStatus::Entered,
                        ticks: Some(tick),
                    }),
                }),
            )?;
        }

        if simulate.disconnect_at == Some(tick) {
            info!("Dropping the connection at tick {}", tick);
            transport.sever();
            handle.on_disconnect("simulated connection drop")?;
            transport.reopen();
            control
                .send(ServerControl::Reconnected)
                .context("Loopback server stopped early")?;
        }

        sleep(tick_interval).await;
    }

    let last_tick: Tick = simulate.ticks;
    handle.end(
        last_tick,
        EndPayload {
            challenge_ticks: last_tick,
            overall_ticks: last_tick,
        },
    )?;
    encounter.clear();

    let final_snapshot = settle(&handle, &client_config.sync).await?;

    handle.shutdown()?;
    client_task.await.context("Sync client task failed")?;
    drop(handle);
    drop(transport);
    drop(control);
    let log = server_task.await.context("Loopback server task failed")?;

    Ok(SimulationReport {
        seed,
        client_messages: log.client_messages,
        notifications: sink.notifications(),
        events_recorded: log.events_recorded,
        rejected_messages: log.rejected_messages,
        close_reason: log.close_reason,
        final_snapshot,
    })
}

fn random_event(rng: &mut StdRng, tick: Tick) -> GameplayEvent {
    match rng.random_range(0..3u8) {
        0 => GameplayEvent::new(
            "npc_update",
            json!({ "tick": tick, "hitpoints": rng.random_range(0..=1000u32) }),
        ),
        1 => GameplayEvent::new(
            "player_update",
            json!({ "tick": tick, "x": rng.random_range(0..64u32), "y": rng.random_range(0..64u32) }),
        ),
        _ => GameplayEvent::new(
            "player_attack",
            json!({ "tick": tick, "damage": rng.random_range(0..=80u32) }),
        ),
    }
}

/// Wait until the client is idle or the configured timeouts have run out
async fn settle(handle: &SyncHandle, sync: &SyncConfig) -> Result<SyncSnapshot> {
    let start_budget: u64 = (1..=u64::from(sync.start_retries) + 1)
        .map(|n| sync.start_timeout_ms.saturating_mul(n))
        .sum();
    let deadline = Instant::now()
        + Duration::from_millis(start_budget.saturating_add(sync.end_timeout_ms))
        + SETTLE_MARGIN;

    loop {
        let snapshot = handle.snapshot().await?;
        if snapshot.status == Status::Idle || Instant::now() >= deadline {
            if snapshot.status != Status::Idle {
                warn!("Client did not settle, still {}", snapshot.status);
            }
            return Ok(snapshot);
        }
        sleep(SETTLE_POLL).await;
    }
}
