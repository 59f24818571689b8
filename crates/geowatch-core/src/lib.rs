//! geowatch-core: pure building blocks for the permission-gated position watcher.
//! Value types, the consent state machine, and the channel-keyed listener
//! registry. No IO, no async, no collaborators.

pub mod consent;
pub mod event;
pub mod types;

pub use consent::{
    ConsentAction, ConsentCycle, ConsentDecision, ConsentGate, ConsentState, SettleOutcome,
    UnknownConsentAction, preference_key, prompt_message,
};
pub use event::{Callback, Dispatch, EventRegistry, ListenerId};
pub use types::{
    Channel, Coordinates, Position, PositionError, PositionErrorCode, PositionOptions,
    UnknownChannel, WatchEvent,
};
