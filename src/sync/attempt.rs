use crate::protocol::{EndPayload, MetadataUpdate, RequestId, StartPayload, Tick};
use std::sync::Arc;
use std::time::Duration;

/// One in-flight try at starting a session.
///
/// Retries produce a new value through [`StartAttempt::retry`]; timers hold
/// only the `request_id` and compare it against the current attempt.
#[derive(Debug, Clone)]
pub struct StartAttempt {
    request_id: RequestId,
    payload: Arc<StartPayload>,
    retry_budget: u32,
    retries_remaining: u32,
    queued_metadata: Vec<(Tick, MetadataUpdate)>,
    pending_end: Option<EndPayload>,
}

/// What is left of an attempt once the server has assigned a session id
#[derive(Debug)]
pub struct AttemptParts {
    pub payload: Arc<StartPayload>,
    pub queued_metadata: Vec<(Tick, MetadataUpdate)>,
    pub pending_end: Option<EndPayload>,
}

impl StartAttempt {
    pub fn new(request_id: RequestId, payload: StartPayload, retry_budget: u32) -> Self {
        Self {
            request_id,
            payload: Arc::new(payload),
            retry_budget,
            retries_remaining: retry_budget,
            queued_metadata: Vec::new(),
            pending_end: None,
        }
    }

    /// Next try of the same logical start, carrying queued state forward
    pub fn retry(self, request_id: RequestId) -> Self {
        Self {
            request_id,
            retries_remaining: self.retries_remaining.saturating_sub(1),
            ..self
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retries_remaining > 0
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn payload(&self) -> &StartPayload {
        &self.payload
    }

    /// 1 for the first try, 2 for the first retry, and so on
    pub fn attempt_number(&self) -> u32 {
        self.retry_budget - self.retries_remaining + 1
    }

    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    /// Linear backoff: attempt `n` waits `n * base`
    pub fn timeout_for(attempt_number: u32, base: Duration) -> Duration {
        base.saturating_mul(attempt_number.max(1))
    }

    pub fn timeout(&self, base: Duration) -> Duration {
        Self::timeout_for(self.attempt_number(), base)
    }

    pub fn queue_metadata(&mut self, tick: Tick, update: MetadataUpdate) {
        self.queued_metadata.push((tick, update));
    }

    pub fn queued_metadata(&self) -> &[(Tick, MetadataUpdate)] {
        &self.queued_metadata
    }

    /// Remember an end that fired before the start was acknowledged. A later
    /// end replaces an earlier one.
    pub fn set_pending_end(&mut self, end: EndPayload) {
        self.pending_end = Some(end);
    }

    pub fn pending_end(&self) -> Option<&EndPayload> {
        self.pending_end.as_ref()
    }

    pub fn into_parts(self) -> AttemptParts {
        AttemptParts {
            payload: self.payload,
            queued_metadata: self.queued_metadata,
            pending_end: self.pending_end,
        }
    }
}
