use crate::env;
use crate::protocol::{ChallengeKind, RequestId, SessionId, Tick};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle status of the recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Idle,
    Starting,
    Active,
    Ending,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Idle => "idle",
            Status::Starting => "starting",
            Status::Active => "active",
            Status::Ending => "ending",
        };
        f.write_str(name)
    }
}

/// Server-assigned recording context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub kind: ChallengeKind,
    pub spectator: bool,
}

/// Timing and retry configuration for the sync protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Timeout of the first start attempt. Attempt `n` waits `n` times this.
    pub start_timeout_ms: u64,
    /// Retries after the first start attempt
    pub start_retries: u32,
    /// How long to wait for an end acknowledgment before dropping the session locally
    pub end_timeout_ms: u64,
    /// Delay before asking the presentation layer to refresh its history
    pub history_refresh_delay_ms: u64,
}

impl SyncConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn end_timeout(&self) -> Duration {
        Duration::from_millis(self.end_timeout_ms)
    }

    pub fn history_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.history_refresh_delay_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: env::defaults::START_TIMEOUT_MS,
            start_retries: env::defaults::START_RETRIES,
            end_timeout_ms: env::defaults::END_TIMEOUT_MS,
            history_refresh_delay_ms: env::defaults::HISTORY_REFRESH_DELAY_MS,
        }
    }
}

/// Point-in-time view of the state machine, for status queries and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub status: Status,
    pub session_id: Option<SessionId>,
    pub current_tick: Tick,
    pub last_request_id: RequestId,
    pub pending_bulk_events: usize,
    pub queued_metadata_events: usize,
    pub starts_blocked: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("Sync client has shut down")]
    ClientClosed,
}
