//! Persisted sync counters

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub(crate) const SYNCED_TOTAL: &str = "synced_total";
pub(crate) const DUPLICATES_TOTAL: &str = "duplicates_total";
pub(crate) const CONFLICTS_TOTAL: &str = "conflicts_total";
pub(crate) const LAST_SYNCED_AT: &str = "last_synced_at";

/// Lifetime totals kept alongside the queue, surviving restarts and pruning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounters {
    /// Items acknowledged by the remote endpoint
    pub synced_total: u64,
    /// Photos skipped because the parent already had the same content
    pub duplicates_total: u64,
    /// Items escalated to conflicts
    pub conflicts_total: u64,
    /// Last fully successful sync pass (Unix ms)
    pub last_synced_at: Option<i64>,
}

pub(crate) fn increment(conn: &Connection, key: &str, by: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_counters (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = value + excluded.value",
        params![key, by],
    )?;
    Ok(())
}

pub(crate) fn set(conn: &Connection, key: &str, value: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_counters (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn get(conn: &Connection, key: &str) -> Result<Option<i64>> {
    let value = conn
        .query_row(
            "SELECT value FROM sync_counters WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub(crate) fn load(conn: &Connection) -> Result<SyncCounters> {
    let total = |key: &str| -> Result<u64> {
        Ok(get(conn, key)?
            .and_then(|value| u64::try_from(value).ok())
            .unwrap_or(0))
    };

    Ok(SyncCounters {
        synced_total: total(SYNCED_TOTAL)?,
        duplicates_total: total(DUPLICATES_TOTAL)?,
        conflicts_total: total(CONFLICTS_TOTAL)?,
        last_synced_at: get(conn, LAST_SYNCED_AT)?,
    })
}

/// Read the lifetime counters
pub fn load_counters(conn: &Connection) -> Result<SyncCounters> {
    load(conn)
}

/// Persist the completion time of the last fully successful pass
pub fn record_last_synced_at(conn: &Connection, timestamp: i64) -> Result<()> {
    set(conn, LAST_SYNCED_AT, timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_counters_default_to_zero() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(load(db.connection()).unwrap(), SyncCounters::default());
    }

    #[test]
    fn test_increment_and_set() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        increment(conn, SYNCED_TOTAL, 2).unwrap();
        increment(conn, SYNCED_TOTAL, 1).unwrap();
        set(conn, LAST_SYNCED_AT, 1_700_000_000_000).unwrap();

        let counters = load(conn).unwrap();
        assert_eq!(counters.synced_total, 3);
        assert_eq!(counters.last_synced_at, Some(1_700_000_000_000));
    }
}
