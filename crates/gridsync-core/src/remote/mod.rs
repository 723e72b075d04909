//! Remote mutation endpoint abstraction.
//!
//! The sync core only needs to know whether a replay was acknowledged and,
//! when it was not, which failure class applies. HTTP specifics live in
//! [`http`].

mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{PhotoUploadQueueItem, SyncQueueItem};

pub use http::{classify_status, HttpRemoteEndpoint, StatusClass};

/// Successful acknowledgement from the remote endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    /// Response body, when the endpoint returned JSON
    pub body: Option<Value>,
}

/// Failure reported by the remote endpoint, already classified.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// Timeout, refused connection, 5xx and similar; retried up to the budget
    #[error("Transient network error: {0}")]
    Transient(String),

    /// The endpoint rejected the payload; not retried
    #[error("Rejected with HTTP {status}: {message}")]
    PermanentValidation { status: u16, message: String },

    /// Remote state diverged from what the mutation assumed
    #[error("Conflict detected: {message}")]
    ConflictDetected {
        message: String,
        remote_payload: Option<Value>,
    },
}

impl RemoteError {
    /// A call that did not finish within its bound.
    pub fn timeout(after: Duration) -> Self {
        Self::Transient(format!("Request timed out after {}ms", after.as_millis()))
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Replays queued mutations and uploads photos.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Replay one queued mutation.
    async fn replay(&self, item: &SyncQueueItem) -> Result<Ack, RemoteError>;

    /// Upload one photo's bytes.
    async fn upload_photo(
        &self,
        photo: &PhotoUploadQueueItem,
        bytes: &[u8],
    ) -> Result<Ack, RemoteError>;
}
