use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Game tick index. Ticks only move forward within a session; an idle client
/// takes whatever tick the next challenge starts from.
pub type Tick = u32;

/// Correlation id for start/end requests. Zero is reserved for "no request".
pub type RequestId = u32;

/// Opaque server-assigned recording session id
pub type SessionId = String;

/// Type of challenge being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    TheatreOfBlood,
    ChambersOfXeric,
    TombsOfAmascut,
    Inferno,
    Colosseum,
}

/// Difficulty or party-size mode of a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeMode {
    #[default]
    Unknown,
    Entry,
    Regular,
    Hard,
}

/// Stage (room, wave, path) within a challenge. Stages are totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stage(pub u32);

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {}", self.0)
    }
}

/// How a stage progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Entered,
    Started,
    Completed,
    Wiped,
}

/// Stage-level progress attached to a metadata update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageUpdate {
    pub stage: Stage,
    pub status: StageStatus,
    /// Ticks spent in the stage, when known
    pub ticks: Option<Tick>,
}

/// Immutable description of the session a start request asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPayload {
    pub kind: ChallengeKind,
    pub mode: ChallengeMode,
    pub stage: Stage,
    pub party: Vec<String>,
    pub spectator: bool,
}

/// Totals reported when a challenge ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndPayload {
    pub challenge_ticks: Tick,
    pub overall_ticks: Tick,
}

/// Session-wide or stage-level change. Queued while no session id exists and
/// replayed once one is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub mode: Option<ChallengeMode>,
    pub stage_update: Option<StageUpdate>,
}

/// Ordinary per-tick gameplay event. The body is opaque to the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameplayEvent {
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl GameplayEvent {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Everything the encounter detectors can report
#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeEvent {
    Start(StartPayload),
    End(EndPayload),
    Metadata(MetadataUpdate),
    Bulk(GameplayEvent),
}

impl From<GameplayEvent> for ChallengeEvent {
    fn from(event: GameplayEvent) -> Self {
        ChallengeEvent::Bulk(event)
    }
}

/// Coarse classification driving how an event is admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Lifecycle,
    Metadata,
    Bulk,
}

impl ChallengeEvent {
    pub fn class(&self) -> EventClass {
        match self {
            ChallengeEvent::Start(_) | ChallengeEvent::End(_) => EventClass::Lifecycle,
            ChallengeEvent::Metadata(_) => EventClass::Metadata,
            ChallengeEvent::Bulk(_) => EventClass::Bulk,
        }
    }
}

/// A serialized bulk event tagged with the tick it was produced on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickEvent {
    pub tick: Tick,
    pub payload: Vec<u8>,
}

/// Messages sent from the client to the recording server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartRequest {
        request_id: RequestId,
        kind: ChallengeKind,
        mode: ChallengeMode,
        stage: Stage,
        party: Vec<String>,
        spectator: bool,
    },
    EndRequest {
        request_id: RequestId,
        session_id: SessionId,
        challenge_ticks: Tick,
        overall_ticks: Tick,
    },
    UpdateRequest {
        session_id: SessionId,
        mode: Option<ChallengeMode>,
        stage_update: Option<StageUpdate>,
    },
    EventBatch {
        session_id: SessionId,
        events: Vec<TickEvent>,
    },
    ConfirmationResponse {
        session_id: SessionId,
        valid: bool,
        spectator: Option<bool>,
    },
    Pong,
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::StartRequest { .. } => "start_request",
            ClientMessage::EndRequest { .. } => "end_request",
            ClientMessage::UpdateRequest { .. } => "update_request",
            ClientMessage::EventBatch { .. } => "event_batch",
            ClientMessage::ConfirmationResponse { .. } => "confirmation_response",
            ClientMessage::Pong => "pong",
        }
    }
}

/// Server-reported error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerErrorKind {
    BadRequest,
    Unimplemented,
    Unauthenticated,
    UsernameMismatch,
    RecordingEnded,
    #[serde(other)]
    Unknown,
}

/// Server-side request to validate a session after a reconnect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub session_id: SessionId,
    /// Challenge the server recorded for the session. The client refuses a
    /// session whose kind differs from the encounter it is observing.
    pub kind: ChallengeKind,
    pub stage: Stage,
    pub party: Vec<String>,
    pub username: String,
}

/// Messages received from the recording server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    StartResponse {
        request_id: RequestId,
        session_id: Option<SessionId>,
        error: Option<String>,
    },
    EndResponse {
        request_id: RequestId,
    },
    ServerError {
        kind: ServerErrorKind,
        session_id: Option<SessionId>,
        message: Option<String>,
        username: Option<String>,
    },
    ConfirmationRequest(ConfirmationRequest),
    Ping,
    ShutdownPending {
        shutdown_at: DateTime<Utc>,
    },
    ShutdownImminent,
    ShutdownCanceled,
}
