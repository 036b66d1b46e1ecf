use crate::protocol::SessionId;
use crate::sync::types::Status;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Why a local start was refused without contacting the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRejection {
    TransportClosed,
    ServerShutdown,
    UsernameMismatch,
    SessionInProgress,
}

/// Why a start that reached the server did not produce a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartFailure {
    TimedOut { attempts: u32 },
    Refused { message: Option<String> },
}

/// Status changes pushed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StatusChanged {
        status: Status,
        session_id: Option<SessionId>,
    },
    StartRejected(StartRejection),
    StartFailed(StartFailure),
    SessionEnded {
        session_id: SessionId,
        acknowledged: bool,
    },
    SessionConfirmed {
        session_id: SessionId,
        spectator: bool,
    },
    RecordingEnded {
        session_id: Option<SessionId>,
        message: Option<String>,
    },
    UsernameMismatch {
        expected: Option<String>,
    },
    Unauthenticated,
    Disconnected {
        reason: String,
    },
    ShutdownPending {
        shutdown_at: DateTime<Utc>,
    },
    ShutdownImminent,
    ShutdownCanceled,
    HistoryRefresh,
}

/// Receiver of notifications. Never queried by the client.
pub trait StatusSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn notify(&self, notification: Notification) {
        match &notification {
            Notification::StartFailed(_)
            | Notification::UsernameMismatch { .. }
            | Notification::Unauthenticated
            | Notification::RecordingEnded { .. } => warn!("{:?}", notification),
            _ => info!("{:?}", notification),
        }
    }
}
