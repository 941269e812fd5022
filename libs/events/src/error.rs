//! Error types for boundary data.

use thiserror::Error;

/// Errors that can occur when validating or decoding boundary data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// A job submission is malformed.
    #[error("invalid job {job_id}: {reason}")]
    InvalidJob { job_id: String, reason: String },

    /// A node inventory entry is malformed.
    #[error("invalid node {name}: {reason}")]
    InvalidNode { name: String, reason: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
