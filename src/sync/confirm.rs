//! Reconnect-time session confirmation.
//!
//! After a reconnect the server may ask whether a session it still considers
//! open matches what the client is currently observing. Answering requires a
//! local status query that may block, so it runs on the blocking pool and the
//! verdict is handed back to the state machine through a callback.

use crate::protocol::{ChallengeKind, ConfirmationRequest, SessionId, Stage};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// What the local detectors know about the encounter in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncounterSnapshot {
    pub kind: ChallengeKind,
    pub stage: Stage,
    pub party: Vec<String>,
}

/// Local status queries used by the handshake
pub trait EncounterProbe: Send + Sync {
    /// Cheap check, safe to call on the tick path
    fn has_active_encounter(&self) -> bool;

    /// Full snapshot. May block.
    fn snapshot(&self) -> Option<EncounterSnapshot>;
}

/// Probe for clients that never resume sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEncounter;

impl EncounterProbe for NoEncounter {
    fn has_active_encounter(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Option<EncounterSnapshot> {
        None
    }
}

/// Probe backed by a shared slot the detectors write into
#[derive(Debug, Default)]
pub struct SharedEncounter {
    current: RwLock<Option<EncounterSnapshot>>,
}

impl SharedEncounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, snapshot: EncounterSnapshot) {
        if let Ok(mut current) = self.current.write() {
            *current = Some(snapshot);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut current) = self.current.write() {
            *current = None;
        }
    }
}

impl EncounterProbe for SharedEncounter {
    fn has_active_encounter(&self) -> bool {
        self.current.read().map(|c| c.is_some()).unwrap_or(false)
    }

    fn snapshot(&self) -> Option<EncounterSnapshot> {
        self.current.read().ok().and_then(|c| c.clone())
    }
}

/// A confirmation request tagged with the connection it arrived on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub epoch: u64,
    pub request: ConfirmationRequest,
}

/// Result of checking a confirmation request against local state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationVerdict {
    pub epoch: u64,
    pub session_id: SessionId,
    pub kind: ChallengeKind,
    pub valid: bool,
    pub spectator: bool,
}

fn roster(names: &[String]) -> HashSet<String> {
    names.iter().map(|name| name.to_lowercase()).collect()
}

/// Decide whether the local encounter matches the server's view.
///
/// Valid when the challenge kinds agree, the local stage has not regressed
/// behind the claimed one, and both rosters name the same players ignoring
/// case. The requester is a spectator when absent from the local roster.
pub fn evaluate(
    pending: &PendingConfirmation,
    snapshot: Option<&EncounterSnapshot>,
) -> ConfirmationVerdict {
    let request = &pending.request;
    let (valid, spectator) = match snapshot {
        Some(local) => {
            let local_party = roster(&local.party);
            let claimed_party = roster(&request.party);

            let kind_matches = local.kind == request.kind;
            let stage_ok = local.stage >= request.stage;
            let party_matches = local_party == claimed_party;
            let spectator = !local_party.contains(&request.username.to_lowercase());

            debug!(
                "Confirmation for {}: kind={} stage={} party={} spectator={}",
                request.session_id, kind_matches, stage_ok, party_matches, spectator
            );
            (kind_matches && stage_ok && party_matches, spectator)
        }
        None => (false, false),
    };

    ConfirmationVerdict {
        epoch: pending.epoch,
        session_id: request.session_id.clone(),
        kind: request.kind,
        valid,
        spectator,
    }
}

/// Runs confirmation checks off the tick path
pub trait ConfirmationExecutor: Send + Sync {
    fn submit(&self, pending: PendingConfirmation);
}

type VerdictCallback = Arc<dyn Fn(ConfirmationVerdict) + Send + Sync>;

/// Executor that evaluates on tokio's blocking pool
pub struct BlockingConfirmationExecutor {
    probe: Arc<dyn EncounterProbe>,
    on_verdict: VerdictCallback,
}

impl BlockingConfirmationExecutor {
    pub fn new<F>(probe: Arc<dyn EncounterProbe>, on_verdict: F) -> Self
    where
        F: Fn(ConfirmationVerdict) + Send + Sync + 'static,
    {
        Self {
            probe,
            on_verdict: Arc::new(on_verdict),
        }
    }
}

impl ConfirmationExecutor for BlockingConfirmationExecutor {
    fn submit(&self, pending: PendingConfirmation) {
        let probe = self.probe.clone();
        let on_verdict = self.on_verdict.clone();

        tokio::spawn(async move {
            let session_id = pending.request.session_id.clone();
            let result = tokio::task::spawn_blocking(move || {
                let snapshot = probe.snapshot();
                evaluate(&pending, snapshot.as_ref())
            })
            .await;

            match result {
                Ok(verdict) => on_verdict(verdict),
                Err(e) => warn!("Confirmation check for {} failed: {}", session_id, e),
            }
        });
    }
}
