use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// What the far side of a [`ChannelTransport`] observes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(Vec<u8>),
    Closed(String),
}

/// In-process transport over an unbounded tokio channel.
///
/// Used by the loopback simulation and by tests that want to observe every
/// frame the client emits.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let transport = Self {
            outbound,
            open: Arc::new(AtomicBool::new(true)),
        };
        (transport, receiver)
    }

    /// Simulate the connection coming back after a drop
    pub fn reopen(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Simulate the connection dropping without a local close
    pub fn sever(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Transport for ChannelTransport {
    fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(TransportEvent::Frame(bytes))
            .map_err(|_| TransportError::SendFailed("peer dropped".to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("Closing channel transport: {}", reason);
            let _ = self.outbound.send(TransportEvent::Closed(reason.to_string()));
        }
    }
}
