use crate::protocol::{RequestId, SessionId};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

/// Deferred work the state machine asks for. Firings carry enough identity to
/// be checked against current state, so a late timer is harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    StartAttempt {
        request_id: RequestId,
    },
    End {
        request_id: RequestId,
        session_id: SessionId,
    },
    HistoryRefresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Timer facility independent of the tick path
pub trait TimeoutScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, timer: Timer) -> TimerId;

    /// Cancel a timer if it has not fired yet
    fn cancel(&self, id: TimerId);

    fn cancel_all(&self);
}

type FireCallback = Arc<dyn Fn(Timer) + Send + Sync>;

/// Scheduler backed by tokio timers. Each timer is a spawned task that sleeps
/// and then hands the [`Timer`] to the callback.
pub struct TokioScheduler {
    next_id: AtomicU64,
    handles: Arc<DashMap<TimerId, AbortHandle>>,
    on_fire: FireCallback,
}

impl TokioScheduler {
    pub fn new<F>(on_fire: F) -> Self
    where
        F: Fn(Timer) + Send + Sync + 'static,
    {
        Self {
            next_id: AtomicU64::new(1),
            handles: Arc::new(DashMap::new()),
            on_fire: Arc::new(on_fire),
        }
    }

    pub fn pending(&self) -> usize {
        self.handles.len()
    }
}

impl TimeoutScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, timer: Timer) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handles = self.handles.clone();
        let on_fire = self.on_fire.clone();

        let deadline = Instant::now() + delay;
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            // Wait for the handle to be registered so removal cannot race insertion
            let _ = registered_rx.await;
            tokio::time::sleep_until(deadline).await;
            handles.remove(&id);
            on_fire(timer);
        });

        self.handles.insert(id, task.abort_handle());
        let _ = registered_tx.send(());
        debug!("Scheduled timer {:?} in {:?}", id, delay);
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Some((_, handle)) = self.handles.remove(&id) {
            handle.abort();
            debug!("Cancelled timer {:?}", id);
        }
    }

    fn cancel_all(&self) {
        let ids: Vec<TimerId> = self.handles.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.cancel(id);
        }
    }
}
