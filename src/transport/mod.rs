//! Transport boundary consumed by the sync client.
//!
//! The client only needs a non-blocking `send`, an `is_open` query and a way
//! to close the channel on fatal errors. Inbound traffic is pushed into the
//! client by whoever owns the connection (`SyncHandle::on_message` and
//! `SyncHandle::on_disconnect`).

pub mod channel;

pub use channel::{ChannelTransport, TransportEvent};

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Duplex channel to the recording server
pub trait Transport: Send + Sync {
    /// Queue bytes for delivery. Must not block.
    fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Close the channel. The owner is expected to report the disconnect back
    /// to the client.
    fn close(&self, reason: &str);
}
