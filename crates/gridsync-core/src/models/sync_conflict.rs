//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::id::uuid_id;
use super::queue_item::{EntityType, Operation, QueueItemId};
use crate::error::{Error, Result};

uuid_id!(
    /// A unique identifier for a sync conflict record
    ConflictId
);

/// How an operator settled a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Re-enqueue the local change for another attempt
    KeepLocal,
    /// Discard the local change
    KeepRemote,
    /// Enqueue a caller-supplied merged payload
    Merge,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keep_local" | "local" => Ok(Self::KeepLocal),
            "keep_remote" | "remote" | "server" => Ok(Self::KeepRemote),
            "merge" | "merged" => Ok(Self::Merge),
            other => Err(Error::InvalidInput(format!(
                "Unknown resolution strategy: {other}"
            ))),
        }
    }
}

/// A queue item that could not be safely auto-replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSyncConflict {
    /// Conflict identifier
    pub id: ConflictId,
    /// Queue item the conflict was promoted from (relation only)
    pub source_queue_item_id: QueueItemId,
    /// Entity kind of the originating mutation
    pub entity_type: EntityType,
    /// Logical entity the mutation targeted
    pub entity_id: String,
    /// Mutation kind of the originating item
    pub operation: Operation,
    /// Local view of the entity (the queued payload)
    pub local_payload: Value,
    /// Remote view, when the endpoint reported it
    pub remote_payload: Option<Value>,
    /// Payload chosen at resolution time
    pub resolved_payload: Option<Value>,
    /// Error that caused the escalation
    pub reason: Option<String>,
    /// Whether an operator settled the conflict
    pub resolved: bool,
    /// Strategy used, once resolved
    pub resolution_strategy: Option<ResolutionStrategy>,
    /// Detection timestamp (Unix ms)
    pub created_at: i64,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: Option<i64>,
}
