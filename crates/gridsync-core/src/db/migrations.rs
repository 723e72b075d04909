//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 4;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, V1_QUEUE_AND_CONFLICTS)?;
    }
    if version < 2 {
        apply(conn, 2, V2_PHOTO_BLOBS)?;
    }
    if version < 3 {
        apply(conn, 3, V3_COUNTERS)?;
    }
    if version < 4 {
        apply(conn, 4, V4_PHOTO_LOCATION)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.unwrap_or(0))
}

/// Apply one migration's statements atomically and record its version
fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    for stmt in statements {
        tx.execute(stmt, [])?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated sync store to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: queue items and conflict records
const V1_QUEUE_AND_CONFLICTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS sync_queue (
        id TEXT PRIMARY KEY,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        operation TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('pending', 'syncing', 'failed', 'synced')),
        attempt_count INTEGER NOT NULL DEFAULT 0 CHECK (attempt_count >= 0),
        created_at INTEGER NOT NULL,
        last_attempted_at INTEGER,
        last_error TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_status_created ON sync_queue(status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue(entity_type, entity_id)",
    "CREATE TRIGGER IF NOT EXISTS sync_queue_attempts_monotonic
     BEFORE UPDATE OF attempt_count ON sync_queue
     FOR EACH ROW
     WHEN NEW.attempt_count < OLD.attempt_count
     BEGIN
         SELECT RAISE(ABORT, 'attempt_count cannot decrease');
     END",
    "CREATE TABLE IF NOT EXISTS sync_conflicts (
        id TEXT PRIMARY KEY,
        source_queue_item_id TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        operation TEXT NOT NULL,
        local_payload TEXT NOT NULL,
        remote_payload TEXT,
        resolved_payload TEXT,
        reason TEXT,
        resolved INTEGER NOT NULL DEFAULT 0,
        resolution_strategy TEXT,
        created_at INTEGER NOT NULL,
        resolved_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved ON sync_conflicts(resolved, created_at DESC)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_conflicts_open_source
     ON sync_conflicts(source_queue_item_id) WHERE resolved = 0",
];

/// Version 2: photo blobs and photo upload metadata
const V2_PHOTO_BLOBS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS photo_blobs (
        blob_ref TEXT PRIMARY KEY,
        bytes BLOB NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS photo_uploads (
        queue_item_id TEXT PRIMARY KEY,
        blob_ref TEXT REFERENCES photo_blobs(blob_ref) ON DELETE SET NULL,
        parent_entity_type TEXT NOT NULL,
        parent_entity_id TEXT NOT NULL,
        photo_type TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        compressed INTEGER NOT NULL DEFAULT 0,
        is_duplicate INTEGER NOT NULL DEFAULT 0,
        uploaded_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_photo_uploads_dedup
     ON photo_uploads(parent_entity_type, parent_entity_id, content_hash)",
];

/// Version 3: counters/cache table
const V3_COUNTERS: &[&str] = &["CREATE TABLE IF NOT EXISTS sync_counters (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    )"];

const V4_PHOTO_LOCATION: &[&str] = &[
    "ALTER TABLE photo_uploads ADD COLUMN gps_latitude REAL",
    "ALTER TABLE photo_uploads ADD COLUMN gps_longitude REAL",
];
