//! Error types for qail-copy.

use arrow::error::ArrowError;
use thiserror::Error;

use crate::protocol::EncodeError;

/// The main error type for bulk-load operations.
///
/// Every variant raised after a session has begun means the whole COPY is
/// void: nothing sent so far may be assumed committed.
#[derive(Debug, Error)]
pub enum CopyError {
    /// Invalid session options, detected before any I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The server did not enter COPY IN mode.
    #[error("Failed to prepare COPY \"{sql}\": {message}")]
    Negotiation { sql: String, message: String },

    /// Sending copy data failed hard.
    #[error("Error during COPY data transmission: {0}")]
    Transmission(String),

    /// The end signal or the final result reported failure.
    #[error("Failed to copy data: {0}")]
    Finalization(String),

    /// A row could not be encoded.
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Arrow failed while formatting a value as text.
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// A session method was called in the wrong phase.
    #[error("Invalid COPY session state: {0}")]
    State(String),

    /// A batch does not have the column count the session was started with.
    #[error("Column count mismatch: expected {expected}, got {actual}")]
    ColumnCount { expected: usize, actual: usize },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CopyError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }
}

/// Result type alias for qail-copy operations.
pub type CopyResult<T> = Result<T, CopyError>;
