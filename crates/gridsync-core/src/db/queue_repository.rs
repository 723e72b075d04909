//! Sync queue repository implementation

use rusqlite::{params, Connection, OptionalExtension};

use super::counters;
use super::{json_text, parse_column, parse_json_column};
use crate::error::{Error, Result};
use crate::models::{EntityType, QueueItemId, QueueStatus, SyncQueueItem};
use crate::util::unix_millis_now;

pub(super) const QUEUE_COLUMNS: &str = "id, entity_type, entity_id, operation, payload, status, \
     attempt_count, created_at, last_attempted_at, last_error";

/// Trait for queue storage operations
pub trait QueueRepository {
    /// Insert a new item. The item must be `pending`.
    fn insert(&self, item: &SyncQueueItem) -> Result<()>;

    /// Get an item by ID
    fn get(&self, id: &QueueItemId) -> Result<Option<SyncQueueItem>>;

    /// List `pending` items, oldest first
    fn list_pending(&self) -> Result<Vec<SyncQueueItem>>;

    /// List `failed` items, oldest first
    fn list_failed(&self) -> Result<Vec<SyncQueueItem>>;

    /// List every item that is not yet `synced`, oldest first
    fn list_active(&self) -> Result<Vec<SyncQueueItem>>;

    /// Non-photo items a processing pass may replay, oldest first
    fn list_replayable(&self, retry_budget: u32) -> Result<Vec<SyncQueueItem>>;

    /// `failed` items whose attempts reached the budget
    fn list_exhausted(&self, retry_budget: u32) -> Result<Vec<SyncQueueItem>>;

    /// `pending|failed -> syncing`
    fn mark_syncing(&self, id: &QueueItemId) -> Result<SyncQueueItem>;

    /// `syncing|pending -> synced`
    fn mark_synced(&self, id: &QueueItemId) -> Result<SyncQueueItem>;

    /// `syncing|pending -> failed`, incrementing the attempt count
    fn mark_failed(&self, id: &QueueItemId, error: &str) -> Result<SyncQueueItem>;

    /// `failed -> pending` for a manual retry; the attempt count is kept
    fn retry(&self, id: &QueueItemId) -> Result<SyncQueueItem>;

    /// Count items still waiting on the remote for an entity type
    fn count_pending_by_entity(&self, entity_type: EntityType) -> Result<usize>;

    /// Count items in the given status
    fn count_by_status(&self, status: QueueStatus) -> Result<usize>;

    /// Delete `synced` rows, returning how many were removed
    fn prune_synced(&self) -> Result<usize>;

    /// Move items stuck in `syncing` back to `pending`
    fn reclassify_interrupted(&self) -> Result<usize>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn list_where(&self, filter: &str, params: impl rusqlite::Params) -> Result<Vec<SyncQueueItem>> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE {filter} ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(params, parse_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn count_where(&self, filter: &str, params: impl rusqlite::Params) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM sync_queue WHERE {filter}");
        let count: i64 = self.conn.query_row(&sql, params, |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn transition(&self, id: &QueueItemId, transition: Transition<'_>) -> Result<SyncQueueItem> {
        let tx = self.conn.unchecked_transaction()?;
        let item = apply_transition(&tx, id, transition)?;
        tx.commit()?;
        Ok(item)
    }
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn insert(&self, item: &SyncQueueItem) -> Result<()> {
        insert_item(self.conn, item)
    }

    fn get(&self, id: &QueueItemId) -> Result<Option<SyncQueueItem>> {
        fetch_item(self.conn, id)
    }

    fn list_pending(&self) -> Result<Vec<SyncQueueItem>> {
        self.list_where("status = 'pending'", [])
    }

    fn list_failed(&self) -> Result<Vec<SyncQueueItem>> {
        self.list_where("status = 'failed'", [])
    }

    fn list_active(&self) -> Result<Vec<SyncQueueItem>> {
        self.list_where("status != 'synced'", [])
    }

    fn list_replayable(&self, retry_budget: u32) -> Result<Vec<SyncQueueItem>> {
        self.list_where(
            "entity_type != 'photo'
             AND (status = 'pending' OR (status = 'failed' AND attempt_count < ?1))",
            params![retry_budget],
        )
    }

    fn list_exhausted(&self, retry_budget: u32) -> Result<Vec<SyncQueueItem>> {
        self.list_where(
            "status = 'failed' AND attempt_count >= ?1",
            params![retry_budget],
        )
    }

    fn mark_syncing(&self, id: &QueueItemId) -> Result<SyncQueueItem> {
        self.transition(id, Transition::Syncing)
    }

    fn mark_synced(&self, id: &QueueItemId) -> Result<SyncQueueItem> {
        self.transition(id, Transition::Synced)
    }

    fn mark_failed(&self, id: &QueueItemId, error: &str) -> Result<SyncQueueItem> {
        self.transition(id, Transition::Failed { error })
    }

    fn retry(&self, id: &QueueItemId) -> Result<SyncQueueItem> {
        self.transition(id, Transition::Pending)
    }

    fn count_pending_by_entity(&self, entity_type: EntityType) -> Result<usize> {
        self.count_where(
            "entity_type = ?1 AND status IN ('pending', 'syncing', 'failed')",
            params![entity_type.as_str()],
        )
    }

    fn count_by_status(&self, status: QueueStatus) -> Result<usize> {
        self.count_where("status = ?1", params![status.as_str()])
    }

    fn prune_synced(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM sync_queue WHERE status = 'synced'", [])?;
        Ok(removed)
    }

    fn reclassify_interrupted(&self) -> Result<usize> {
        let moved = self.conn.execute(
            "UPDATE sync_queue SET status = 'pending' WHERE status = 'syncing'",
            [],
        )?;
        Ok(moved)
    }
}

/// Status change requested on a queue row.
pub(super) enum Transition<'a> {
    Syncing,
    Synced,
    Failed { error: &'a str },
    Pending,
    /// Fail the item with its attempts raised to the retry budget.
    ///
    /// Only the outcome of a replay (`after_attempt`) may exhaust an item
    /// that is still `syncing`.
    Exhausted {
        error: Option<&'a str>,
        retry_budget: u32,
        after_attempt: bool,
    },
}

impl Transition<'_> {
    const fn target(&self) -> QueueStatus {
        match self {
            Self::Syncing => QueueStatus::Syncing,
            Self::Synced => QueueStatus::Synced,
            Self::Failed { .. } | Self::Exhausted { .. } => QueueStatus::Failed,
            Self::Pending => QueueStatus::Pending,
        }
    }

    const fn allowed_from(&self, status: QueueStatus) -> bool {
        use QueueStatus::{Failed, Pending, Syncing};
        match self {
            Self::Syncing => matches!(status, Pending | Failed),
            Self::Synced | Self::Failed { .. } => matches!(status, Syncing | Pending),
            Self::Pending => matches!(status, Failed | Pending),
            Self::Exhausted { after_attempt, .. } => {
                matches!(status, Pending | Failed) || (*after_attempt && matches!(status, Syncing))
            }
        }
    }
}

pub(super) fn insert_item(conn: &Connection, item: &SyncQueueItem) -> Result<()> {
    if item.status != QueueStatus::Pending {
        return Err(Error::InvalidInput(format!(
            "New queue items must be pending, got {}",
            item.status
        )));
    }

    let payload = json_text(&item.payload)?;
    conn.execute(
        "INSERT INTO sync_queue (id, entity_type, entity_id, operation, payload, status, attempt_count, created_at, last_attempted_at, last_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            item.id.as_str(),
            item.entity_type.as_str(),
            item.entity_id,
            item.operation.as_str(),
            payload,
            item.status.as_str(),
            item.attempt_count,
            item.created_at,
            item.last_attempted_at,
            item.last_error,
        ],
    )?;
    Ok(())
}

pub(super) fn fetch_item(conn: &Connection, id: &QueueItemId) -> Result<Option<SyncQueueItem>> {
    let item = conn
        .query_row(
            &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?1"),
            params![id.as_str()],
            parse_item,
        )
        .optional()?;
    Ok(item)
}

pub(super) fn delete_item(conn: &Connection, id: &QueueItemId) -> Result<()> {
    conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![id.as_str()])?;
    Ok(())
}

/// Apply a status transition inside the caller's transaction.
pub(super) fn apply_transition(
    conn: &Connection,
    id: &QueueItemId,
    transition: Transition<'_>,
) -> Result<SyncQueueItem> {
    let mut item =
        fetch_item(conn, id)?.ok_or_else(|| Error::NotFound(format!("Queue item {id}")))?;

    if !transition.allowed_from(item.status) {
        return Err(Error::InvalidTransition {
            id: id.as_str(),
            from: item.status.to_string(),
            to: transition.target().to_string(),
        });
    }

    let now = unix_millis_now();
    item.status = transition.target();
    match transition {
        Transition::Syncing => {
            item.last_attempted_at = Some(now);
        }
        Transition::Synced | Transition::Pending => {
            item.last_error = None;
        }
        Transition::Failed { error } => {
            item.attempt_count = item.attempt_count.saturating_add(1);
            item.last_attempted_at = Some(now);
            item.last_error = Some(error.to_string());
        }
        Transition::Exhausted {
            error,
            retry_budget,
            after_attempt,
        } => {
            if after_attempt {
                item.attempt_count = item.attempt_count.saturating_add(1);
                item.last_attempted_at = Some(now);
            }
            item.attempt_count = item.attempt_count.max(retry_budget);
            if let Some(error) = error {
                item.last_error = Some(error.to_string());
            }
        }
    }

    conn.execute(
        "UPDATE sync_queue
         SET status = ?1, attempt_count = ?2, last_attempted_at = ?3, last_error = ?4
         WHERE id = ?5",
        params![
            item.status.as_str(),
            item.attempt_count,
            item.last_attempted_at,
            item.last_error,
            id.as_str(),
        ],
    )?;

    if item.status == QueueStatus::Synced {
        counters::increment(conn, counters::SYNCED_TOTAL, 1)?;
    }

    Ok(item)
}

/// Parse a queue item from a row selected with [`QUEUE_COLUMNS`]
pub(super) fn parse_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncQueueItem> {
    Ok(SyncQueueItem {
        id: parse_column(row, 0)?,
        entity_type: parse_column(row, 1)?,
        entity_id: row.get(2)?,
        operation: parse_column(row, 3)?,
        payload: parse_json_column(row, 4)?,
        status: parse_column(row, 5)?,
        attempt_count: row.get(6)?,
        created_at: row.get(7)?,
        last_attempted_at: row.get(8)?,
        last_error: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Operation;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn item(entity_type: EntityType, entity_id: &str) -> SyncQueueItem {
        SyncQueueItem::new(entity_type, entity_id, Operation::Update, json!({"id": entity_id}))
            .unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let ticket = item(EntityType::Ticket, "ticket-1");
        repo.insert(&ticket).unwrap();

        let fetched = repo.get(&ticket.id).unwrap().unwrap();
        assert_eq!(fetched, ticket);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());
        assert!(repo.get(&QueueItemId::new()).unwrap().is_none());
    }

    #[test]
    fn test_insert_rejects_non_pending() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let mut synced = item(EntityType::Ticket, "ticket-1");
        synced.status = QueueStatus::Synced;
        assert!(matches!(repo.insert(&synced), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_list_pending_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let mut first = item(EntityType::Ticket, "t1");
        let mut second = item(EntityType::Ticket, "t2");
        let mut third = item(EntityType::Ticket, "t3");
        first.created_at = 100;
        second.created_at = 200;
        third.created_at = 300;

        // Inserted out of order on purpose.
        repo.insert(&third).unwrap();
        repo.insert(&first).unwrap();
        repo.insert(&second).unwrap();

        let ids: Vec<_> = repo
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|i| i.entity_id)
            .collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_mark_failed_increments_attempts() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let expense = item(EntityType::Expense, "exp-1");
        repo.insert(&expense).unwrap();

        let mut last_attempts = 0;
        for round in 1..=3 {
            repo.mark_syncing(&expense.id).unwrap();
            let failed = repo.mark_failed(&expense.id, "connection refused").unwrap();
            assert_eq!(failed.status, QueueStatus::Failed);
            assert_eq!(failed.attempt_count, round);
            assert!(failed.attempt_count > last_attempts);
            assert_eq!(failed.last_error.as_deref(), Some("connection refused"));
            assert!(failed.last_attempted_at.is_some());
            last_attempts = failed.attempt_count;
        }

        assert_eq!(repo.list_failed().unwrap().len(), 1);
    }

    #[test]
    fn test_only_mark_failed_changes_attempts() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let ticket = item(EntityType::Ticket, "ticket-1");
        repo.insert(&ticket).unwrap();

        assert_eq!(repo.mark_syncing(&ticket.id).unwrap().attempt_count, 0);
        assert_eq!(repo.mark_failed(&ticket.id, "timeout").unwrap().attempt_count, 1);
        assert_eq!(repo.retry(&ticket.id).unwrap().attempt_count, 1);
        assert_eq!(repo.mark_syncing(&ticket.id).unwrap().attempt_count, 1);
        assert_eq!(repo.mark_synced(&ticket.id).unwrap().attempt_count, 1);
    }

    #[test]
    fn test_synced_is_terminal() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let ticket = item(EntityType::Ticket, "ticket-1");
        repo.insert(&ticket).unwrap();
        repo.mark_syncing(&ticket.id).unwrap();
        repo.mark_synced(&ticket.id).unwrap();

        let err = repo.mark_failed(&ticket.id, "late failure").unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert!(repo.mark_syncing(&ticket.id).is_err());
    }

    #[test]
    fn test_transition_missing_item_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());
        let err = repo.mark_syncing(&QueueItemId::new()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_retry_clears_error() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let ticket = item(EntityType::Ticket, "ticket-1");
        repo.insert(&ticket).unwrap();
        repo.mark_failed(&ticket.id, "503").unwrap();

        let retried = repo.retry(&ticket.id).unwrap();
        assert_eq!(retried.status, QueueStatus::Pending);
        assert!(retried.last_error.is_none());
    }

    #[test]
    fn test_replayable_respects_budget_and_skips_photos() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let fresh = item(EntityType::Ticket, "fresh");
        let retrying = item(EntityType::Ticket, "retrying");
        let exhausted = item(EntityType::Ticket, "exhausted");
        let photo = item(EntityType::Photo, "photo-1");
        for i in [&fresh, &retrying, &exhausted, &photo] {
            repo.insert(i).unwrap();
        }

        repo.mark_failed(&retrying.id, "503").unwrap();
        for _ in 0..3 {
            repo.mark_failed(&exhausted.id, "503").unwrap();
            repo.retry(&exhausted.id).unwrap();
        }
        repo.mark_syncing(&exhausted.id).unwrap();
        repo.mark_failed(&exhausted.id, "503").unwrap();

        let replayable: Vec<_> = repo
            .list_replayable(3)
            .unwrap()
            .into_iter()
            .map(|i| i.entity_id)
            .collect();
        assert_eq!(replayable, vec!["fresh", "retrying"]);

        let exhausted_ids: Vec<_> = repo
            .list_exhausted(3)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(exhausted_ids, vec![exhausted.id]);
    }

    #[test]
    fn test_count_pending_by_entity() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let a = item(EntityType::Photo, "p1");
        let b = item(EntityType::Photo, "p2");
        let c = item(EntityType::Photo, "p3");
        let d = item(EntityType::TimeEntry, "te1");
        for i in [&a, &b, &c, &d] {
            repo.insert(i).unwrap();
        }
        repo.mark_failed(&b.id, "503").unwrap();
        repo.mark_synced(&c.id).unwrap();

        assert_eq!(repo.count_pending_by_entity(EntityType::Photo).unwrap(), 2);
        assert_eq!(repo.count_pending_by_entity(EntityType::TimeEntry).unwrap(), 1);
        assert_eq!(repo.count_pending_by_entity(EntityType::Expense).unwrap(), 0);
        assert_eq!(repo.count_by_status(QueueStatus::Synced).unwrap(), 1);
    }

    #[test]
    fn test_prune_synced_removes_only_synced() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let done = item(EntityType::Ticket, "done");
        let waiting = item(EntityType::Ticket, "waiting");
        repo.insert(&done).unwrap();
        repo.insert(&waiting).unwrap();
        repo.mark_synced(&done.id).unwrap();

        assert_eq!(repo.prune_synced().unwrap(), 1);
        assert!(repo.get(&done.id).unwrap().is_none());
        assert!(repo.get(&waiting.id).unwrap().is_some());
        assert_eq!(
            counters::load(db.connection()).unwrap().synced_total,
            1,
            "pruning keeps lifetime totals"
        );
    }
}
