use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ─── Channel ──────────────────────────────────────────────────────

/// Named event category a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// A new position fix.
    Change,
    /// The sensor reported a failure.
    Error,
}

impl Channel {
    pub const ALL: [Self; 2] = [Self::Change, Self::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Change => "change",
            Self::Error => "error",
        }
    }

    /// Exact, case-sensitive lookup. Anything else is not a channel.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "change" => Some(Self::Change),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Channel {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownChannel(s.to_owned()))
    }
}

// ─── Position ─────────────────────────────────────────────────────

/// Geographic coordinates of a single fix.
///
/// Latitude and longitude are decimal degrees; distances are metres,
/// speed is metres per second, heading is degrees clockwise from true north.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl Coordinates {
    /// Coordinates with only latitude/longitude known.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: 0.0,
            altitude_accuracy: None,
            heading: None,
            speed: None,
        }
    }

    #[must_use]
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }
}

/// A position fix as reported by the sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub coords: Coordinates,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(coords: Coordinates, timestamp: DateTime<Utc>) -> Self {
        Self { coords, timestamp }
    }

    /// Shorthand for a lat/lon fix taken now.
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self::new(Coordinates::new(latitude, longitude), Utc::now())
    }
}

// ─── Sensor errors ────────────────────────────────────────────────

/// Failure category reported by the sensor. Numeric values match the
/// geolocation service codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionErrorCode {
    Unknown,
    PermissionDenied,
    PositionUnavailable,
    Timeout,
}

impl PositionErrorCode {
    pub fn code(self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::PermissionDenied => 1,
            Self::PositionUnavailable => 2,
            Self::Timeout => 3,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::PermissionDenied,
            2 => Self::PositionUnavailable,
            3 => Self::Timeout,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::PermissionDenied => "permission_denied",
            Self::PositionUnavailable => "position_unavailable",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for PositionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error value produced by the sensor. Passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code} ({}): {message}", .code.code())]
pub struct PositionError {
    pub code: PositionErrorCode,
    pub message: String,
}

impl PositionError {
    pub fn new(code: PositionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

// ─── Options ──────────────────────────────────────────────────────

/// Options forwarded verbatim to the sensor for watches and one-shot reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    /// Upper bound for a single read; `None` waits indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Accept a cached fix no older than this. `0` forces a fresh read.
    pub maximum_age_ms: u64,
}

// ─── Events ───────────────────────────────────────────────────────

/// Payload delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Change(Position),
    Error(PositionError),
}

impl WatchEvent {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Change(_) => Channel::Change,
            Self::Error(_) => Channel::Error,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        match self {
            Self::Change(position) => Some(position),
            Self::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&PositionError> {
        match self {
            Self::Error(error) => Some(error),
            Self::Change(_) => None,
        }
    }
}

impl From<Result<Position, PositionError>> for WatchEvent {
    fn from(reading: Result<Position, PositionError>) -> Self {
        match reading {
            Ok(position) => Self::Change(position),
            Err(error) => Self::Error(error),
        }
    }
}
