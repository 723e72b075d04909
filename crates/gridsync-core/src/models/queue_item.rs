//! Sync queue item model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::id::uuid_id;
use crate::error::{Error, Result};

uuid_id!(
    /// A unique identifier for a queued mutation, using UUID v7 (time-sortable)
    QueueItemId
);

/// Kind of entity a queued mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Ticket,
    TimeEntry,
    Expense,
    Assessment,
    Photo,
}

impl EntityType {
    pub const ALL: [Self; 5] = [
        Self::Ticket,
        Self::TimeEntry,
        Self::Expense,
        Self::Assessment,
        Self::Photo,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::TimeEntry => "time_entry",
            Self::Expense => "expense",
            Self::Assessment => "assessment",
            Self::Photo => "photo",
        }
    }

    /// Background sync tag under which work for this entity type is deferred.
    pub const fn sync_tag(self) -> &'static str {
        match self {
            Self::Ticket => "sync-tickets",
            Self::TimeEntry => "sync-time-entries",
            Self::Expense => "sync-expenses",
            Self::Assessment => "sync-assessments",
            Self::Photo => "sync-photos",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ticket" => Ok(Self::Ticket),
            "time_entry" => Ok(Self::TimeEntry),
            "expense" => Ok(Self::Expense),
            "assessment" => Ok(Self::Assessment),
            "photo" => Ok(Self::Photo),
            other => Err(Error::InvalidInput(format!("Unknown entity type: {other}"))),
        }
    }
}

/// Mutation kind replayed against the remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("Unknown operation: {other}"))),
        }
    }
}

/// Lifecycle status of a queue item. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Syncing,
    Failed,
    Synced,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
            Self::Synced => "synced",
        }
    }

    /// `synced` items are terminal and only wait for pruning.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Synced)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "failed" => Ok(Self::Failed),
            "synced" => Ok(Self::Synced),
            other => Err(Error::InvalidInput(format!("Unknown queue status: {other}"))),
        }
    }
}

/// A durably stored mutation awaiting replay against the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Unique identifier
    pub id: QueueItemId,
    /// Kind of entity the mutation targets
    pub entity_type: EntityType,
    /// Identifier of the logical entity being mutated
    pub entity_id: String,
    /// Mutation kind
    pub operation: Operation,
    /// Mutation body, opaque to the queue
    pub payload: Value,
    /// Current lifecycle status
    pub status: QueueStatus,
    /// Number of failed replays so far
    pub attempt_count: u32,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Timestamp of the last replay attempt (Unix ms)
    pub last_attempted_at: Option<i64>,
    /// Message from the most recent failed attempt
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    /// Create a new `pending` queue item for a local action.
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: Operation,
        payload: Value,
    ) -> Result<Self> {
        let entity_id = entity_id.into().trim().to_string();
        if entity_id.is_empty() {
            return Err(Error::InvalidInput(
                "Queue item entity_id cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            id: QueueItemId::new(),
            entity_type,
            entity_id,
            operation,
            payload,
            status: QueueStatus::Pending,
            attempt_count: 0,
            created_at: chrono::Utc::now().timestamp_millis(),
            last_attempted_at: None,
            last_error: None,
        })
    }

    /// Whether a processing pass may replay this item.
    ///
    /// Pending items are always eligible; failed items only while under budget.
    pub const fn is_replayable(&self, retry_budget: u32) -> bool {
        match self.status {
            QueueStatus::Pending => true,
            QueueStatus::Failed => self.attempt_count < retry_budget,
            QueueStatus::Syncing | QueueStatus::Synced => false,
        }
    }

    /// Whether this item has used up its retry budget and must become a conflict.
    pub const fn is_exhausted(&self, retry_budget: u32) -> bool {
        matches!(self.status, QueueStatus::Failed) && self.attempt_count >= retry_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_queue_item_id_unique() {
        let id1 = QueueItemId::new();
        let id2 = QueueItemId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_queue_item_id_parse() {
        let id = QueueItemId::new();
        let parsed: QueueItemId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_new_item_is_pending() {
        let item = SyncQueueItem::new(
            EntityType::TimeEntry,
            "time-1",
            Operation::Update,
            json!({"break_minutes": 15}),
        )
        .unwrap();

        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.attempt_count, 0);
        assert!(item.created_at > 0);
        assert!(item.last_error.is_none());
    }

    #[test]
    fn test_new_item_rejects_empty_entity_id() {
        assert!(SyncQueueItem::new(EntityType::Ticket, "  ", Operation::Create, json!({})).is_err());
    }

    #[test]
    fn test_entity_type_parse_accepts_dashes() {
        assert_eq!(
            "time-entry".parse::<EntityType>().unwrap(),
            EntityType::TimeEntry
        );
        assert_eq!("PHOTO".parse::<EntityType>().unwrap(), EntityType::Photo);
        assert!("invoice".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_sync_tags_are_distinct() {
        let mut tags: Vec<_> = EntityType::ALL.iter().map(|e| e.sync_tag()).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), EntityType::ALL.len());
    }

    #[test]
    fn test_replay_eligibility() {
        let mut item =
            SyncQueueItem::new(EntityType::Expense, "exp-1", Operation::Create, json!({}))
                .unwrap();
        assert!(item.is_replayable(3));

        item.status = QueueStatus::Failed;
        item.attempt_count = 2;
        assert!(item.is_replayable(3));
        assert!(!item.is_exhausted(3));

        item.attempt_count = 3;
        assert!(!item.is_replayable(3));
        assert!(item.is_exhausted(3));

        item.status = QueueStatus::Synced;
        assert!(!item.is_replayable(3));
        assert!(item.status.is_terminal());
    }
}
