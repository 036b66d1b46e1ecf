//! # Challenge Sync
//!
//! Client side of a recording protocol that streams tick-indexed challenge
//! events to a remote recording server. The client negotiates a server-side
//! session, buffers and orders events until a session exists, correlates
//! requests with acknowledgments, retries starts with linear backoff and
//! reconciles sessions the server still believes are open after a reconnect.
//!
//! ## Architecture Overview
//!
//! - **[`protocol`]**: Wire messages, challenge types and the codec seam
//! - **[`transport`]**: Transport seam and an in-process channel transport
//! - **[`sync`]**: Session state machine, event buffer, start attempts,
//!   request correlation, confirmation handshake and the async client actor
//! - **[`simulation`]**: Loopback server and scripted challenge runs
//! - **[`cli`]**: Argument parsing and configuration discovery
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use challenge_sync::protocol::{ChallengeKind, ChallengeMode, JsonCodec, Stage, StartPayload};
//! use challenge_sync::sync::{NoEncounter, SyncClient, SyncConfig, TracingSink};
//! use challenge_sync::transport::ChannelTransport;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (transport, _frames) = ChannelTransport::new();
//!     let (client, task) = SyncClient::spawn(
//!         SyncConfig::default(),
//!         Arc::new(transport),
//!         Arc::new(JsonCodec),
//!         Arc::new(TracingSink),
//!         Arc::new(NoEncounter),
//!     );
//!
//!     client.start(
//!         0,
//!         StartPayload {
//!             kind: ChallengeKind::Inferno,
//!             mode: ChallengeMode::Regular,
//!             stage: Stage(1),
//!             party: vec!["alice".to_string()],
//!             spectator: false,
//!         },
//!     )?;
//!
//!     println!("Status: {}", client.snapshot().await?.status);
//!     client.shutdown()?;
//!     task.await?;
//!     Ok(())
//! }
//! ```

/// Wire protocol types and codecs.
pub mod protocol;

/// Transport boundary and in-process transports.
pub mod transport;

/// Session synchronization: state machine, buffering, retries and the client actor.
pub mod sync;

/// In-process loopback server and scripted simulation runs.
pub mod simulation;

/// Environment constants and path utilities.
///
/// Centralizes configuration paths and protocol defaults.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use protocol::{ChallengeEvent, ChallengeKind, Codec, JsonCodec};
pub use sync::{Notification, Status, StatusSink, SyncClient, SyncConfig, SyncHandle};
pub use transport::{ChannelTransport, Transport};
