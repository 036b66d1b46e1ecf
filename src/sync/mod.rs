pub mod attempt;
pub mod buffer;
pub mod client;
pub mod confirm;
pub mod correlator;
pub mod machine;
pub mod notify;
pub mod scheduler;
pub mod types;


pub use attempt::StartAttempt;
pub use buffer::EventBuffer;
pub use client::{Command, SyncClient, SyncHandle};
pub use confirm::{
    ConfirmationExecutor, ConfirmationVerdict, EncounterProbe, EncounterSnapshot, NoEncounter,
    PendingConfirmation, SharedEncounter,
};
pub use correlator::{RequestCorrelator, RequestKind};
pub use machine::{Collaborators, SessionStateMachine};
pub use notify::{Notification, StartFailure, StartRejection, StatusSink, TracingSink};
pub use scheduler::{TimeoutScheduler, Timer, TimerId, TokioScheduler};
pub use types::*;
