//! Session lifecycle state machine.
//!
//! The machine is synchronous and owns every piece of protocol state. It is
//! driven by a single owner (see [`crate::sync::client`]) so that local
//! events, inbound messages, timer firings and confirmation verdicts never
//! interleave.

use crate::protocol::{
    ChallengeEvent, ChallengeKind, ClientMessage, Codec, ConfirmationRequest, EndPayload,
    GameplayEvent, MetadataUpdate, RequestId, ServerErrorKind, ServerMessage, SessionId,
    StartPayload, Tick,
};
use crate::sync::attempt::StartAttempt;
use crate::sync::buffer::EventBuffer;
use crate::sync::confirm::{
    ConfirmationExecutor, ConfirmationVerdict, EncounterProbe, PendingConfirmation,
};
use crate::sync::correlator::{RequestCorrelator, RequestKind};
use crate::sync::notify::{Notification, StartFailure, StartRejection, StatusSink};
use crate::sync::scheduler::{TimeoutScheduler, Timer, TimerId};
use crate::sync::types::{Session, Status, SyncConfig, SyncSnapshot};
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// External collaborators the machine calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub codec: Arc<dyn Codec>,
    pub scheduler: Arc<dyn TimeoutScheduler>,
    pub sink: Arc<dyn StatusSink>,
    pub probe: Arc<dyn EncounterProbe>,
    pub confirmations: Arc<dyn ConfirmationExecutor>,
}

/// Set when the server reports that the logged-in account is not the one it
/// authenticated. Blocks new starts until resolved.
#[derive(Debug, Clone)]
struct UsernameBlock {
    expected: Option<String>,
}

pub struct SessionStateMachine {
    config: SyncConfig,
    io: Collaborators,
    status: Status,
    session: Option<Session>,
    attempt: Option<StartAttempt>,
    attempt_timer: Option<TimerId>,
    end_timer: Option<TimerId>,
    correlator: RequestCorrelator,
    buffer: EventBuffer,
    current_tick: Tick,
    epoch: u64,
    shutdown_imminent: bool,
    username: Option<String>,
    username_block: Option<UsernameBlock>,
}

impl SessionStateMachine {
    pub fn new(config: SyncConfig, io: Collaborators) -> Self {
        Self::with_correlator(config, io, RequestCorrelator::new())
    }

    pub fn with_correlator(
        config: SyncConfig,
        io: Collaborators,
        correlator: RequestCorrelator,
    ) -> Self {
        Self {
            config,
            io,
            status: Status::Idle,
            session: None,
            attempt: None,
            attempt_timer: None,
            end_timer: None,
            correlator,
            buffer: EventBuffer::new(),
            current_tick: 0,
            epoch: 0,
            shutdown_imminent: false,
            username: None,
            username_block: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn attempt(&self) -> Option<&StartAttempt> {
        self.attempt.as_ref()
    }

    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            status: self.status,
            session_id: self.session.as_ref().map(|s| s.id.clone()),
            current_tick: self.current_tick,
            last_request_id: self.correlator.last_request_id(),
            pending_bulk_events: self.buffer.len(),
            queued_metadata_events: self
                .attempt
                .as_ref()
                .map(|a| a.queued_metadata().len())
                .unwrap_or(0),
            starts_blocked: self.check_start_guard().is_err(),
        }
    }

    /// Advance local time. Crossing a tick boundary while active flushes
    /// everything buffered for earlier ticks as one batch.
    pub fn on_tick(&mut self, tick: Tick) {
        if self.status == Status::Idle {
            // Nothing is buffered while idle, so the next challenge sets the clock
            self.current_tick = tick;
            return;
        }
        if tick <= self.current_tick {
            return;
        }
        let previous = self.current_tick;
        self.current_tick = tick;

        if self.status == Status::Active {
            self.flush_through(previous);
        }
    }

    /// Admit a detector event produced on `tick`
    pub fn on_local_event(&mut self, tick: Tick, event: ChallengeEvent) {
        if tick < self.current_tick && self.status != Status::Idle {
            debug!(
                "Event for tick {} arrived at tick {}, treating as current",
                tick, self.current_tick
            );
        }
        self.on_tick(tick);

        match event {
            ChallengeEvent::Start(payload) => self.start(payload),
            ChallengeEvent::End(payload) => self.end(payload),
            ChallengeEvent::Metadata(update) => self.metadata(update),
            ChallengeEvent::Bulk(event) => self.bulk(event),
        }
    }

    /// Local "challenge started" trigger
    pub fn start(&mut self, payload: StartPayload) {
        if let Err(rejection) = self.check_start_guard() {
            warn!("Refusing to start {:?} session: {:?}", payload.kind, rejection);
            self.io.sink.notify(Notification::StartRejected(rejection));
            return;
        }

        match self.status {
            Status::Idle => {}
            Status::Starting => {
                if let Some(abandoned) = self.attempt.take() {
                    info!(
                        "Abandoning start attempt {} for a new start",
                        abandoned.request_id()
                    );
                }
                self.cancel_timer(TimerSlot::Attempt);
                self.correlator.clear();
                self.buffer.clear();
            }
            Status::Active | Status::Ending => {
                warn!("Start requested while a session is {}", self.status);
                self.io
                    .sink
                    .notify(Notification::StartRejected(StartRejection::SessionInProgress));
                return;
            }
        }

        let request_id = self.correlator.next_id(RequestKind::Start);
        let attempt = StartAttempt::new(request_id, payload, self.config.start_retries);
        self.set_status(Status::Starting);
        self.send_attempt(attempt);
    }

    /// Local "challenge ended" trigger
    pub fn end(&mut self, payload: EndPayload) {
        match self.status {
            Status::Idle => debug!("Ignoring end while idle"),
            Status::Ending => debug!("Ignoring duplicate end"),
            Status::Starting => {
                if let Some(attempt) = self.attempt.as_mut() {
                    debug!(
                        "End fired before start {} was acknowledged, deferring",
                        attempt.request_id()
                    );
                    attempt.set_pending_end(payload);
                }
            }
            Status::Active => self.begin_end(payload),
        }
    }

    fn metadata(&mut self, update: MetadataUpdate) {
        match self.status {
            Status::Starting => {
                if let Some(attempt) = self.attempt.as_mut() {
                    attempt.queue_metadata(self.current_tick, update);
                }
            }
            Status::Active => {
                self.flush_through(self.current_tick);
                self.send_update(update);
            }
            Status::Idle | Status::Ending => {
                debug!("Dropping metadata update while {}", self.status);
            }
        }
    }

    fn bulk(&mut self, event: GameplayEvent) {
        if !matches!(self.status, Status::Starting | Status::Active) {
            debug!("Dropping {} event while {}", event.kind, self.status);
            return;
        }
        match self.io.codec.encode_event(&event) {
            Ok(payload) => {
                self.buffer.admit_bulk(self.current_tick, payload);
            }
            Err(e) => warn!("Dropping unencodable {} event: {}", event.kind, e),
        }
    }

    /// Record the local account name. Clears a username block once the
    /// expected account is logged in.
    pub fn set_local_username(&mut self, username: String) {
        if let Some(block) = &self.username_block {
            let resolved = match &block.expected {
                Some(expected) => expected.eq_ignore_ascii_case(&username),
                None => self.username.as_deref() != Some(username.as_str()),
            };
            if resolved {
                info!("Username mismatch resolved for {}", username);
                self.username_block = None;
            }
        }
        self.username = Some(username);
    }

    /// Decode and dispatch one inbound frame
    pub fn on_message(&mut self, bytes: &[u8]) {
        match self.io.codec.decode(bytes) {
            Ok(message) => self.handle_message(message),
            Err(e) => warn!("Ignoring malformed server message: {}", e),
        }
    }

    pub fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::StartResponse {
                request_id,
                session_id,
                error,
            } => self.on_start_response(request_id, session_id, error),
            ServerMessage::EndResponse { request_id } => self.on_end_response(request_id),
            ServerMessage::ServerError {
                kind,
                session_id,
                message,
                username,
            } => self.on_server_error(kind, session_id, message, username),
            ServerMessage::ConfirmationRequest(request) => self.on_confirmation_request(request),
            ServerMessage::Ping => self.send(ClientMessage::Pong),
            ServerMessage::ShutdownPending { shutdown_at } => {
                info!("Server shutdown scheduled for {}", shutdown_at);
                self.io
                    .sink
                    .notify(Notification::ShutdownPending { shutdown_at });
            }
            ServerMessage::ShutdownImminent => {
                warn!("Server shutdown imminent, new sessions disabled");
                self.shutdown_imminent = true;
                self.io.sink.notify(Notification::ShutdownImminent);
            }
            ServerMessage::ShutdownCanceled => {
                info!("Server shutdown canceled");
                self.shutdown_imminent = false;
                self.io.sink.notify(Notification::ShutdownCanceled);
            }
        }
    }

    fn on_start_response(
        &mut self,
        request_id: RequestId,
        session_id: Option<SessionId>,
        error: Option<String>,
    ) {
        if !self
            .correlator
            .matches(request_id, RequestKind::Start, self.status)
        {
            debug!(
                "Ignoring stale start response {} (last request {}, status {})",
                request_id,
                self.correlator.last_request_id(),
                self.status
            );
            return;
        }
        self.correlator.settle();
        self.cancel_timer(TimerSlot::Attempt);

        let Some(attempt) = self.attempt.take() else {
            error!("Start response {} matched without an attempt", request_id);
            self.discard_local_state();
            return;
        };

        match session_id {
            Some(session_id) => {
                info!("Start {} acknowledged, session {}", request_id, session_id);
                let kind = attempt.payload().kind;
                let spectator = attempt.payload().spectator;
                self.activate(attempt, session_id, kind, spectator);
            }
            None => {
                warn!(
                    "Start {} refused by server: {}",
                    request_id,
                    error.as_deref().unwrap_or("no reason given")
                );
                self.buffer.clear();
                self.set_status(Status::Idle);
                self.io
                    .sink
                    .notify(Notification::StartFailed(StartFailure::Refused { message: error }));
            }
        }
    }

    fn on_end_response(&mut self, request_id: RequestId) {
        if !self
            .correlator
            .matches(request_id, RequestKind::End, self.status)
        {
            debug!(
                "Ignoring stale end response {} (last request {}, status {})",
                request_id,
                self.correlator.last_request_id(),
                self.status
            );
            return;
        }
        self.correlator.settle();
        self.cancel_timer(TimerSlot::End);

        if let Some(session) = self.session.take() {
            info!("Session {} ended", session.id);
            self.buffer.clear();
            self.set_status(Status::Idle);
            self.io.sink.notify(Notification::SessionEnded {
                session_id: session.id,
                acknowledged: true,
            });
            self.io
                .scheduler
                .schedule(self.config.history_refresh_delay(), Timer::HistoryRefresh);
        }
    }

    fn on_server_error(
        &mut self,
        kind: ServerErrorKind,
        session_id: Option<SessionId>,
        message: Option<String>,
        username: Option<String>,
    ) {
        match kind {
            ServerErrorKind::BadRequest
            | ServerErrorKind::Unimplemented
            | ServerErrorKind::Unknown => {
                warn!(
                    "Server reported {:?}: {}",
                    kind,
                    message.as_deref().unwrap_or("no message")
                );
            }
            ServerErrorKind::Unauthenticated => {
                error!("Server rejected credentials, closing connection");
                self.io.transport.close("unauthenticated");
                self.discard_local_state();
                self.io.sink.notify(Notification::Unauthenticated);
            }
            ServerErrorKind::UsernameMismatch => {
                warn!(
                    "Server expects account {}, new sessions disabled",
                    username.as_deref().unwrap_or("<unknown>")
                );
                self.username_block = Some(UsernameBlock {
                    expected: username.clone(),
                });
                self.io
                    .sink
                    .notify(Notification::UsernameMismatch { expected: username });
            }
            ServerErrorKind::RecordingEnded => {
                if !self.is_current_session(session_id.as_deref()) {
                    debug!("Ignoring recording-ended for {:?}", session_id);
                    return;
                }
                warn!(
                    "Server ended recording {:?}: {}",
                    session_id,
                    message.as_deref().unwrap_or("no message")
                );
                self.discard_local_state();
                self.io
                    .sink
                    .notify(Notification::RecordingEnded { session_id, message });
            }
        }
    }

    fn is_current_session(&self, session_id: Option<&str>) -> bool {
        match self.status {
            Status::Idle => false,
            // No id has been assigned yet, so only an untargeted error applies
            Status::Starting => session_id.is_none(),
            Status::Active | Status::Ending => match (&self.session, session_id) {
                (Some(session), Some(id)) => session.id == id,
                _ => false,
            },
        }
    }

    /// Full reset after the transport dropped
    pub fn on_disconnect(&mut self, reason: &str) {
        info!("Transport disconnected: {}", reason);
        self.epoch += 1;
        self.shutdown_imminent = false;
        self.username_block = None;
        self.discard_local_state();
        self.io.scheduler.cancel_all();
        self.io.sink.notify(Notification::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Handle a timer firing. Timers that no longer match current state are
    /// ignored.
    pub fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::StartAttempt { request_id } => self.on_start_timeout(request_id),
            Timer::End {
                request_id,
                session_id,
            } => self.on_end_timeout(request_id, &session_id),
            Timer::HistoryRefresh => self.io.sink.notify(Notification::HistoryRefresh),
        }
    }

    fn on_start_timeout(&mut self, request_id: RequestId) {
        let current = self.status == Status::Starting
            && self
                .attempt
                .as_ref()
                .is_some_and(|a| a.request_id() == request_id);
        if !current {
            debug!("Ignoring stale start timer for request {}", request_id);
            return;
        }
        self.attempt_timer = None;

        let Some(attempt) = self.attempt.take() else {
            return;
        };

        if attempt.can_retry() {
            let next_id = self.correlator.next_id(RequestKind::Start);
            let retried = attempt.retry(next_id);
            info!(
                "Start request {} timed out, retrying as {} (attempt {})",
                request_id,
                next_id,
                retried.attempt_number()
            );
            self.send_attempt(retried);
        } else {
            let attempts = attempt.attempt_number();
            warn!("Start failed after {} attempts", attempts);
            self.correlator.clear();
            self.buffer.clear();
            self.set_status(Status::Idle);
            self.io
                .sink
                .notify(Notification::StartFailed(StartFailure::TimedOut { attempts }));
        }
    }

    fn on_end_timeout(&mut self, request_id: RequestId, session_id: &str) {
        let current = self.status == Status::Ending
            && self.correlator.last_request_id() == request_id
            && self.session.as_ref().is_some_and(|s| s.id == session_id);
        if !current {
            debug!("Ignoring stale end timer for {}", session_id);
            return;
        }
        self.end_timer = None;

        warn!(
            "End request {} for {} was not acknowledged, closing locally",
            request_id, session_id
        );
        self.correlator.clear();
        if let Some(session) = self.session.take() {
            self.buffer.clear();
            self.set_status(Status::Idle);
            self.io.sink.notify(Notification::SessionEnded {
                session_id: session.id,
                acknowledged: false,
            });
        }
    }

    fn on_confirmation_request(&mut self, request: ConfirmationRequest) {
        if !self.io.probe.has_active_encounter() {
            debug!(
                "No local encounter, rejecting confirmation for {}",
                request.session_id
            );
            self.send(ClientMessage::ConfirmationResponse {
                session_id: request.session_id,
                valid: false,
                spectator: None,
            });
            return;
        }

        debug!("Checking confirmation for {} off the tick path", request.session_id);
        self.io.confirmations.submit(PendingConfirmation {
            epoch: self.epoch,
            request,
        });
    }

    /// Apply a verdict computed by the confirmation executor: answer the
    /// server and adopt the session if it is valid.
    pub fn apply_confirmation(&mut self, verdict: ConfirmationVerdict) {
        if verdict.epoch != self.epoch {
            debug!(
                "Dropping confirmation for {} from an earlier connection",
                verdict.session_id
            );
            return;
        }

        let adoption = if verdict.valid {
            self.adoption_for(&verdict.session_id)
        } else {
            Adoption::Refuse
        };

        let valid = !matches!(adoption, Adoption::Refuse);
        self.send(ClientMessage::ConfirmationResponse {
            session_id: verdict.session_id.clone(),
            valid,
            spectator: valid.then_some(verdict.spectator),
        });

        match adoption {
            Adoption::Refuse => {
                debug!("Confirmation for {} answered invalid", verdict.session_id);
            }
            Adoption::AlreadyAdopted => {
                debug!("Session {} already adopted", verdict.session_id);
            }
            Adoption::Adopt => {
                info!("Resuming confirmed session {}", verdict.session_id);
                match self.attempt.take() {
                    Some(attempt) => {
                        self.correlator.clear();
                        self.cancel_timer(TimerSlot::Attempt);
                        self.activate(
                            attempt,
                            verdict.session_id.clone(),
                            verdict.kind,
                            verdict.spectator,
                        );
                    }
                    None => {
                        self.session = Some(Session {
                            id: verdict.session_id.clone(),
                            kind: verdict.kind,
                            spectator: verdict.spectator,
                        });
                        self.set_status(Status::Active);
                    }
                }
                self.io.sink.notify(Notification::SessionConfirmed {
                    session_id: verdict.session_id,
                    spectator: verdict.spectator,
                });
            }
        }
    }

    fn adoption_for(&self, session_id: &str) -> Adoption {
        match (self.status, &self.session) {
            (Status::Idle, _) | (Status::Starting, _) => Adoption::Adopt,
            (Status::Active, Some(session)) if session.id == session_id => Adoption::AlreadyAdopted,
            _ => {
                warn!(
                    "Cannot adopt session {} while {} with {:?}",
                    session_id,
                    self.status,
                    self.session.as_ref().map(|s| &s.id)
                );
                Adoption::Refuse
            }
        }
    }

    fn check_start_guard(&self) -> Result<(), StartRejection> {
        if !self.io.transport.is_open() {
            return Err(StartRejection::TransportClosed);
        }
        if self.shutdown_imminent {
            return Err(StartRejection::ServerShutdown);
        }
        if self.username_block.is_some() {
            return Err(StartRejection::UsernameMismatch);
        }
        Ok(())
    }

    /// Transmit a start attempt, make it current and arm its timeout
    fn send_attempt(&mut self, attempt: StartAttempt) {
        let payload = attempt.payload();
        self.send(ClientMessage::StartRequest {
            request_id: attempt.request_id(),
            kind: payload.kind,
            mode: payload.mode,
            stage: payload.stage,
            party: payload.party.clone(),
            spectator: payload.spectator,
        });

        let timeout = attempt.timeout(self.config.start_timeout());
        let timer = self.io.scheduler.schedule(
            timeout,
            Timer::StartAttempt {
                request_id: attempt.request_id(),
            },
        );
        debug!(
            "Start request {} sent, timeout {:?}",
            attempt.request_id(),
            timeout
        );
        self.attempt_timer = Some(timer);
        self.attempt = Some(attempt);
    }

    /// Create the session and replay everything captured while starting
    fn activate(
        &mut self,
        attempt: StartAttempt,
        session_id: SessionId,
        kind: ChallengeKind,
        spectator: bool,
    ) {
        let parts = attempt.into_parts();
        self.session = Some(Session {
            id: session_id,
            kind,
            spectator,
        });
        self.set_status(Status::Active);

        for (tick, update) in parts.queued_metadata {
            self.flush_through(tick);
            self.send_update(update);
        }
        self.flush_through(self.current_tick);

        if let Some(end) = parts.pending_end {
            self.begin_end(end);
        }
    }

    fn begin_end(&mut self, payload: EndPayload) {
        let Some(session_id) = self.session.as_ref().map(|s| s.id.clone()) else {
            error!("End requested without a session");
            return;
        };

        self.flush_through(self.current_tick);
        let request_id = self.correlator.next_id(RequestKind::End);
        self.set_status(Status::Ending);
        self.send(ClientMessage::EndRequest {
            request_id,
            session_id: session_id.clone(),
            challenge_ticks: payload.challenge_ticks,
            overall_ticks: payload.overall_ticks,
        });

        self.end_timer = Some(self.io.scheduler.schedule(
            self.config.end_timeout(),
            Timer::End {
                request_id,
                session_id,
            },
        ));
    }

    fn send_update(&mut self, update: MetadataUpdate) {
        if let Some(session) = &self.session {
            let message = ClientMessage::UpdateRequest {
                session_id: session.id.clone(),
                mode: update.mode,
                stage_update: update.stage_update,
            };
            self.send(message);
        }
    }

    /// Send everything buffered up to `tick` as a single batch
    fn flush_through(&mut self, tick: Tick) {
        let Some(session_id) = self.session.as_ref().map(|s| s.id.clone()) else {
            return;
        };
        let events = self.buffer.flush_up_to(tick);
        if events.is_empty() {
            return;
        }
        debug!(
            "Flushing {} events through tick {} for {}",
            events.len(),
            tick,
            session_id
        );
        self.send(ClientMessage::EventBatch { session_id, events });
    }

    fn send(&self, message: ClientMessage) {
        let name = message.name();
        let bytes = match self.io.codec.encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {}: {}", name, e);
                return;
            }
        };
        if !self.io.transport.is_open() {
            warn!("Dropping {}: transport is closed", name);
            return;
        }
        if let Err(e) = self.io.transport.send(bytes) {
            warn!("Failed to send {}: {}", name, e);
        }
    }

    /// Drop session, attempt and buffered state. Idempotent.
    fn discard_local_state(&mut self) {
        self.cancel_timer(TimerSlot::Attempt);
        self.cancel_timer(TimerSlot::End);
        self.correlator.clear();
        self.attempt = None;
        self.session = None;
        self.buffer.clear();
        self.current_tick = 0;
        self.set_status(Status::Idle);
    }

    fn cancel_timer(&mut self, slot: TimerSlot) {
        let timer = match slot {
            TimerSlot::Attempt => self.attempt_timer.take(),
            TimerSlot::End => self.end_timer.take(),
        };
        if let Some(id) = timer {
            self.io.scheduler.cancel(id);
        }
    }

    fn set_status(&mut self, status: Status) {
        if self.status == status {
            return;
        }
        info!("Session status {} -> {}", self.status, status);
        self.status = status;
        if status == Status::Idle {
            self.current_tick = 0;
        }
        self.io.sink.notify(Notification::StatusChanged {
            status,
            session_id: self.session.as_ref().map(|s| s.id.clone()),
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum TimerSlot {
    Attempt,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adoption {
    Adopt,
    AlreadyAdopted,
    Refuse,
}
