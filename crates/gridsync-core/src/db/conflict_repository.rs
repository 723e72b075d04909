//! Conflict detection and resolution storage

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::queue_repository::{apply_transition, delete_item, fetch_item, insert_item, Transition};
use super::{
    counters, json_text, optional_json_text, parse_column, parse_json_column,
    parse_optional_column, parse_optional_json_column, photo_repository,
};
use crate::error::{Error, Result};
use crate::models::{
    ConflictId, EntityType, LocalSyncConflict, QueueItemId, ResolutionStrategy, SyncQueueItem,
};
use crate::util::unix_millis_now;

const CONFLICT_COLUMNS: &str = "id, source_queue_item_id, entity_type, entity_id, operation, \
     local_payload, remote_payload, resolved_payload, reason, resolved, resolution_strategy, \
     created_at, resolved_at";

/// Why a queue item is being turned into a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationReason {
    /// The endpoint rejected the payload; retrying cannot help
    PermanentFailure(String),
    /// The remote entity no longer matches what the mutation assumed
    RemoteDiverged {
        message: String,
        remote_payload: Option<Value>,
    },
    /// An operator moved the item by hand
    Operator,
}

/// Result of settling a conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution {
    /// The conflict, now resolved
    pub conflict: LocalSyncConflict,
    /// Fresh queue item created by `keep_local` or `merge`
    pub requeued: Option<SyncQueueItem>,
}

/// Trait for conflict storage operations
pub trait ConflictRepository {
    /// Convert a `failed` item whose attempts reached the budget into a conflict.
    ///
    /// The queue row is removed in the same transaction.
    fn create_from_queue_item(
        &self,
        id: &QueueItemId,
        retry_budget: u32,
    ) -> Result<LocalSyncConflict>;

    /// Fail an item with its attempts raised to the budget, then convert it.
    fn escalate(
        &self,
        id: &QueueItemId,
        reason: EscalationReason,
        retry_budget: u32,
    ) -> Result<LocalSyncConflict>;

    /// Convert every exhausted `failed` item, oldest first
    fn escalate_exhausted(&self, retry_budget: u32) -> Result<Vec<LocalSyncConflict>>;

    /// Get a conflict by ID
    fn get(&self, id: &ConflictId) -> Result<Option<LocalSyncConflict>>;

    /// List unresolved conflicts, newest first
    fn list_unresolved(&self) -> Result<Vec<LocalSyncConflict>>;

    /// List every conflict including resolved ones, newest first
    fn list_all(&self) -> Result<Vec<LocalSyncConflict>>;

    /// Count unresolved conflicts
    fn count_unresolved(&self) -> Result<usize>;

    /// Settle a conflict with the given strategy
    fn resolve(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        payload: Option<Value>,
    ) -> Result<ConflictResolution>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn list_where(&self, filter: &str) -> Result<Vec<LocalSyncConflict>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE {filter}
             ORDER BY created_at DESC, rowid DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let conflicts = stmt
            .query_map([], parse_conflict)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(conflicts)
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn create_from_queue_item(
        &self,
        id: &QueueItemId,
        retry_budget: u32,
    ) -> Result<LocalSyncConflict> {
        let tx = self.conn.unchecked_transaction()?;

        let item =
            fetch_item(&tx, id)?.ok_or_else(|| Error::NotFound(format!("Queue item {id}")))?;
        if !item.is_exhausted(retry_budget) {
            return Err(Error::InvalidTransition {
                id: id.as_str(),
                from: format!("{} ({} of {retry_budget} attempts)", item.status, item.attempt_count),
                to: "conflict".to_string(),
            });
        }

        let reason = item.last_error.clone();
        let conflict = promote(&tx, item, None, reason)?;
        tx.commit()?;
        Ok(conflict)
    }

    fn escalate(
        &self,
        id: &QueueItemId,
        reason: EscalationReason,
        retry_budget: u32,
    ) -> Result<LocalSyncConflict> {
        let tx = self.conn.unchecked_transaction()?;

        let (error, after_attempt, remote_payload) = match &reason {
            EscalationReason::PermanentFailure(message) => (Some(message.as_str()), true, None),
            EscalationReason::RemoteDiverged {
                message,
                remote_payload,
            } => (Some(message.as_str()), true, remote_payload.clone()),
            EscalationReason::Operator => (None, false, None),
        };

        let item = apply_transition(
            &tx,
            id,
            Transition::Exhausted {
                error,
                retry_budget,
                after_attempt,
            },
        )?;
        let reason_text = item
            .last_error
            .clone()
            .or_else(|| Some("Moved to conflict by operator".to_string()));
        let conflict = promote(&tx, item, remote_payload, reason_text)?;

        tx.commit()?;
        Ok(conflict)
    }

    fn escalate_exhausted(&self, retry_budget: u32) -> Result<Vec<LocalSyncConflict>> {
        let exhausted: Vec<QueueItemId> = {
            let mut stmt = self.conn.prepare(
                "SELECT id FROM sync_queue
                 WHERE status = 'failed' AND attempt_count >= ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let ids = stmt
                .query_map(params![retry_budget], |row| parse_column(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        exhausted
            .iter()
            .map(|id| self.create_from_queue_item(id, retry_budget))
            .collect()
    }

    fn get(&self, id: &ConflictId) -> Result<Option<LocalSyncConflict>> {
        fetch_conflict(self.conn, id)
    }

    fn list_unresolved(&self) -> Result<Vec<LocalSyncConflict>> {
        self.list_where("resolved = 0")
    }

    fn list_all(&self) -> Result<Vec<LocalSyncConflict>> {
        self.list_where("1 = 1")
    }

    fn count_unresolved(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts WHERE resolved = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn resolve(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        payload: Option<Value>,
    ) -> Result<ConflictResolution> {
        let tx = self.conn.unchecked_transaction()?;

        let mut conflict =
            fetch_conflict(&tx, id)?.ok_or_else(|| Error::NotFound(format!("Conflict {id}")))?;
        if conflict.resolved {
            return Err(Error::InvalidTransition {
                id: id.as_str(),
                from: "resolved".to_string(),
                to: strategy.to_string(),
            });
        }

        let is_photo = conflict.entity_type == EntityType::Photo;
        let (resolved_payload, requeued) = match strategy {
            ResolutionStrategy::KeepRemote => {
                if is_photo {
                    photo_repository::discard_upload(&tx, &conflict.source_queue_item_id)?;
                }
                (payload.or_else(|| conflict.remote_payload.clone()), None)
            }
            ResolutionStrategy::KeepLocal | ResolutionStrategy::Merge => {
                let body = match (strategy, payload) {
                    (_, Some(body)) => body,
                    (ResolutionStrategy::KeepLocal, None) => conflict.local_payload.clone(),
                    _ => {
                        return Err(Error::InvalidInput(
                            "Merge resolution requires a merged payload".to_string(),
                        ))
                    }
                };

                let item = SyncQueueItem::new(
                    conflict.entity_type,
                    conflict.entity_id.clone(),
                    conflict.operation,
                    body.clone(),
                )?;
                insert_item(&tx, &item)?;
                if is_photo {
                    photo_repository::reassign_upload(
                        &tx,
                        &conflict.source_queue_item_id,
                        &item.id,
                    )?;
                }
                (Some(body), Some(item))
            }
        };

        let resolved_at = unix_millis_now();
        let resolved_text = optional_json_text(resolved_payload.as_ref())?;
        tx.execute(
            "UPDATE sync_conflicts
             SET resolved = 1, resolution_strategy = ?1, resolved_payload = ?2, resolved_at = ?3
             WHERE id = ?4",
            params![strategy.as_str(), resolved_text, resolved_at, id.as_str()],
        )?;
        tx.commit()?;

        tracing::info!(
            "Resolved conflict {id} for {} {} with {strategy}",
            conflict.entity_type,
            conflict.entity_id
        );

        conflict.resolved = true;
        conflict.resolution_strategy = Some(strategy);
        conflict.resolved_payload = resolved_payload;
        conflict.resolved_at = Some(resolved_at);

        Ok(ConflictResolution {
            conflict,
            requeued,
        })
    }
}

/// Insert the conflict for `item` and remove it from the active queue.
fn promote(
    conn: &Connection,
    item: SyncQueueItem,
    remote_payload: Option<Value>,
    reason: Option<String>,
) -> Result<LocalSyncConflict> {
    let conflict = LocalSyncConflict {
        id: ConflictId::new(),
        source_queue_item_id: item.id,
        entity_type: item.entity_type,
        entity_id: item.entity_id,
        operation: item.operation,
        local_payload: item.payload,
        remote_payload,
        resolved_payload: None,
        reason,
        resolved: false,
        resolution_strategy: None,
        created_at: unix_millis_now(),
        resolved_at: None,
    };

    let local_text = json_text(&conflict.local_payload)?;
    let remote_text = optional_json_text(conflict.remote_payload.as_ref())?;
    conn.execute(
        "INSERT INTO sync_conflicts (id, source_queue_item_id, entity_type, entity_id, operation, local_payload, remote_payload, resolved_payload, reason, resolved, resolution_strategy, created_at, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, 0, NULL, ?9, NULL)",
        params![
            conflict.id.as_str(),
            conflict.source_queue_item_id.as_str(),
            conflict.entity_type.as_str(),
            conflict.entity_id,
            conflict.operation.as_str(),
            local_text,
            remote_text,
            conflict.reason,
            conflict.created_at,
        ],
    )?;
    delete_item(conn, &conflict.source_queue_item_id)?;
    counters::increment(conn, counters::CONFLICTS_TOTAL, 1)?;

    tracing::warn!(
        "Escalated {} {} (queue item {}) to conflict {}: {}",
        conflict.entity_type,
        conflict.entity_id,
        conflict.source_queue_item_id,
        conflict.id,
        conflict.reason.as_deref().unwrap_or("no error recorded")
    );

    Ok(conflict)
}

fn fetch_conflict(conn: &Connection, id: &ConflictId) -> Result<Option<LocalSyncConflict>> {
    let conflict = conn
        .query_row(
            &format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?1"),
            params![id.as_str()],
            parse_conflict,
        )
        .optional()?;
    Ok(conflict)
}

fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<LocalSyncConflict> {
    Ok(LocalSyncConflict {
        id: parse_column(row, 0)?,
        source_queue_item_id: parse_column(row, 1)?,
        entity_type: parse_column(row, 2)?,
        entity_id: row.get(3)?,
        operation: parse_column(row, 4)?,
        local_payload: parse_json_column(row, 5)?,
        remote_payload: parse_optional_json_column(row, 6)?,
        resolved_payload: parse_optional_json_column(row, 7)?,
        reason: row.get(8)?,
        resolved: row.get::<_, i32>(9)? != 0,
        resolution_strategy: parse_optional_column(row, 10)?,
        created_at: row.get(11)?,
        resolved_at: row.get(12)?,
    })
}
