//! Position sensor boundary. No business logic; the watcher drives it.

use std::fmt;
use std::sync::Arc;

use geowatch_core::{Position, PositionError, PositionOptions};

/// One reading from the sensor: a fix or the sensor's own error value.
pub type SensorReading = Result<Position, PositionError>;

/// Receives every reading of a continuous watch until it is cleared.
pub type WatchSink = Arc<dyn Fn(SensorReading) + Send + Sync>;

/// Receives the single reading of a one-shot query.
pub type PositionReply = Box<dyn FnOnce(SensorReading) + Send>;

/// Opaque id of a continuous watch, issued by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(u64);

impl WatchHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

/// The underlying position service. Enables mock injection for testing.
///
/// Implementations may invoke the sink or reply from any thread, and may do
/// so synchronously from inside the registering call.
pub trait PositionSensor: Send + Sync {
    /// Start a continuous watch feeding `sink`.
    fn watch_position(&self, sink: WatchSink, options: &PositionOptions) -> WatchHandle;

    /// Stop a watch. The handle is dead afterwards.
    fn clear_watch(&self, handle: WatchHandle);

    /// Read the position once and answer through `reply`.
    fn current_position(&self, reply: PositionReply, options: &PositionOptions);
}

impl<T: PositionSensor + ?Sized> PositionSensor for Arc<T> {
    fn watch_position(&self, sink: WatchSink, options: &PositionOptions) -> WatchHandle {
        (**self).watch_position(sink, options)
    }

    fn clear_watch(&self, handle: WatchHandle) {
        (**self).clear_watch(handle)
    }

    fn current_position(&self, reply: PositionReply, options: &PositionOptions) {
        (**self).current_position(reply, options)
    }
}
