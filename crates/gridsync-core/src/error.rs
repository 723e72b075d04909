//! Error types for gridsync-core

use thiserror::Error;

/// Result type alias using gridsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in gridsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// The durable store could not be opened or written.
    ///
    /// Never swallowed: a lost write is a lost user mutation.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Queue item, conflict or blob not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A status transition that the item lifecycle does not allow
    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
