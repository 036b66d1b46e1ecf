use crate::protocol::types::{ClientMessage, GameplayEvent, ServerMessage};

#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },
    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Wire codec used by the sync client. The client never looks inside the
/// encoded bytes.
pub trait Codec: Send + Sync {
    fn encode(&self, message: &ClientMessage) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<ServerMessage, CodecError>;

    /// Serialize a gameplay event for the admission buffer
    fn encode_event(&self, event: &GameplayEvent) -> Result<Vec<u8>, CodecError>;

    /// Encode a server message. Only needed by in-process servers.
    fn encode_server(&self, message: &ServerMessage) -> Result<Vec<u8>, CodecError>;

    /// Decode a client message. Only needed by in-process servers.
    fn decode_client(&self, bytes: &[u8]) -> Result<ClientMessage, CodecError>;
}

/// JSON codec backed by serde_json
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, message: &ClientMessage) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(|e| CodecError::Encode {
            what: message.name(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<ServerMessage, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn encode_event(&self, event: &GameplayEvent) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(event).map_err(|e| CodecError::Encode {
            what: "gameplay_event",
            reason: e.to_string(),
        })
    }

    fn encode_server(&self, message: &ServerMessage) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(|e| CodecError::Encode {
            what: "server_message",
            reason: e.to_string(),
        })
    }

    fn decode_client(&self, bytes: &[u8]) -> Result<ClientMessage, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}
