use crate::protocol::RequestId;
use crate::sync::types::Status;

/// Kind of correlated request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Start,
    End,
}

impl RequestKind {
    /// Status the machine must still be in for a response to be accepted
    pub fn expected_status(self) -> Status {
        match self {
            RequestKind::Start => Status::Starting,
            RequestKind::End => Status::Ending,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OutstandingRequest {
    id: RequestId,
    kind: RequestKind,
    settled: bool,
}

/// Issues request ids and matches responses against the last request sent.
#[derive(Debug)]
pub struct RequestCorrelator {
    next_request_id: RequestId,
    last: Option<OutstandingRequest>,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Counter starting at `first`. Zero is bumped to 1.
    pub fn starting_at(first: RequestId) -> Self {
        Self {
            next_request_id: first.max(1),
            last: None,
        }
    }

    /// Allocate a fresh id and record it as the outstanding request
    pub fn next_id(&mut self, kind: RequestKind) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id = if id == RequestId::MAX { 1 } else { id + 1 };
        self.last = Some(OutstandingRequest {
            id,
            kind,
            settled: false,
        });
        id
    }

    /// Id of the most recently issued request, 0 if none
    pub fn last_request_id(&self) -> RequestId {
        self.last.map(|r| r.id).unwrap_or(0)
    }

    pub fn matches(&self, response_id: RequestId, kind: RequestKind, status: Status) -> bool {
        match self.last {
            Some(last) => {
                !last.settled
                    && last.id == response_id
                    && last.kind == kind
                    && status == kind.expected_status()
            }
            None => false,
        }
    }

    /// Mark the outstanding request as answered; duplicates no longer match
    pub fn settle(&mut self) {
        if let Some(last) = self.last.as_mut() {
            last.settled = true;
        }
    }

    /// Forget the outstanding request, keeping the counter
    pub fn clear(&mut self) {
        self.last = None;
    }
}
