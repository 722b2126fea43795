//! Error types for the memstream core library.

use thiserror::Error;

/// Top-level error type for all memstream operations.
#[derive(Error, Debug)]
pub enum MemstreamError {
    /// A node with the given ID is not in the store.
    #[error("Memory node not found: {0}")]
    NodeNotFound(crate::NodeId),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A persisted artifact is missing, truncated or fails its checksum.
    #[error("Corrupt memory artifact `{artifact}`: {reason}")]
    Corrupt {
        /// Which artifact failed (e.g. `nodes.json`).
        artifact: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A persisted timestamp did not match `YYYY-MM-DD HH:MM:SS`.
    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp {
        /// The offending string.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// The embedding provider failed to produce a vector.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The text-generation collaborator failed or returned malformed output.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for MemstreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, MemstreamError>;
