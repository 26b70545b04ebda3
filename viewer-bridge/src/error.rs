use viewer_types::ConversionError;

use crate::executor::ExecutorError;

/// Errors surfaced by bridge calls.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum BridgeError {
    /// The target was destroyed (or never registered); nothing was submitted.
    #[error("Viewer target does not exist: {0}")]
    TargetGone(String),

    /// The sandbox reported that the requested resource does not exist.
    #[error("Not found: {0}")]
    RemoteNotFound(String),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Script submission failed: {0}")]
    Submit(#[from] ExecutorError),

    #[error("Target already registered: {0}")]
    TargetExists(String),

    #[error("Invalid target name: {0:?}")]
    InvalidTargetName(String),

    #[error("Events already connected for target: {0}")]
    EventsConnected(String),

    #[error("Correlation key still pending: {0}")]
    KeyInUse(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Protocol(e.to_string())
    }
}
