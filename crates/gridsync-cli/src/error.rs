use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] gridsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid JSON payload: {0}")]
    InvalidPayload(String),
    #[error("Payload is required for {0}")]
    MissingPayload(String),
    #[error("Identifier cannot be empty")]
    EmptyId,
    #[error("Queue item not found for id/prefix: {0}")]
    QueueItemNotFound(String),
    #[error("Conflict not found for id/prefix: {0}")]
    ConflictNotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Could not infer the MIME type of {0}; pass --mime-type")]
    UnknownMimeType(String),
    #[error(
        "Sync is not configured. Set GRIDSYNC_API_BASE_URL or api_base_url in the settings file to enable `gridsync sync`."
    )]
    SyncNotConfigured,
}
