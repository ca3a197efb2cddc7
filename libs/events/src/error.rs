//! Error types for lifecycle notification decoding.

use thiserror::Error;

/// Errors that can occur when decoding a lifecycle notification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The notification body is not a usable payload.
    #[error("invalid notification payload: {0}")]
    InvalidPayload(String),

    /// An actionable notification is missing a field the handler needs.
    #[error("notification for {transition} is missing {field}")]
    MissingField {
        transition: String,
        field: &'static str,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
