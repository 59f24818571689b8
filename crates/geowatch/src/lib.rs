//! geowatch: permission-gated position watcher.
//!
//! A [`Watcher`] exposes a position sensor to application code. The sensor's
//! continuous watch runs only while `change`/`error` listeners exist, and
//! nothing is delivered until the user has granted consent, either through a
//! prompt or a remembered preference.
//!
//! Collaborators (sensor, prompt UI, preference store, unload hook) are
//! injected through [`Collaborators`]; [`testing`] ships in-memory doubles.

pub mod error;
pub mod preferences;
pub mod prompt;
pub mod sensor;
pub mod testing;
pub mod unload;
pub mod watcher;

pub use error::{PreferenceError, WatchError};
pub use preferences::{JsonPreferenceStore, MemoryPreferenceStore, PreferenceStore};
pub use prompt::{ConsentPrompt, ConsentRequest, ConsentResponder};
pub use sensor::{PositionReply, PositionSensor, SensorReading, WatchHandle, WatchSink};
pub use unload::{UnloadCallback, UnloadNotifier, UnloadSignal, UnloadToken};
pub use watcher::{Collaborators, PositionQuery, Watcher, WatcherBuilder, WatcherConfig};

pub use geowatch_core::{
    Channel, ConsentAction, ConsentDecision, ConsentState, Coordinates, ListenerId, Position,
    PositionError, PositionErrorCode, PositionOptions, WatchEvent, preference_key, prompt_message,
};
