//! Error types for the watcher and its stock collaborators.

use geowatch_core::PositionError;
use thiserror::Error;

/// Why a one-shot position query failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    #[error("permission to access the position was denied")]
    PermissionDenied,

    #[error("sensor error: {0}")]
    Sensor(#[from] PositionError),

    #[error("watcher went away before the query settled")]
    Detached,
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference file io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("preference file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
