//! Database connection management

use std::path::Path;

use rusqlite::Connection;

use super::migrations;
use super::queue_repository::{QueueRepository, SqliteQueueRepository};
use crate::error::Result;

/// Database wrapper for the durable sync store
pub struct Database {
    conn: Connection,
    reclassified_on_open: usize,
}

impl Database {
    /// Open the store at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations and reclassifies items interrupted mid-sync.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        let mut database = Self {
            conn,
            reclassified_on_open: 0,
        };
        database.configure()?;
        database.migrate()?;
        database.reclassified_on_open = database.reclassify_interrupted()?;
        Ok(database)
    }

    /// Configure `SQLite` for durability and concurrency
    fn configure(&self) -> Result<()> {
        // In-memory databases report "memory" and cannot switch to WAL
        self.conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })
            .ok();
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn)
    }

    /// Items left in `syncing` by a session that never finished are retryable.
    fn reclassify_interrupted(&self) -> Result<usize> {
        let reclassified =
            SqliteQueueRepository::new(&self.conn).reclassify_interrupted()?;
        if reclassified > 0 {
            tracing::warn!(
                "Reclassified {reclassified} queue item(s) left in syncing state as pending"
            );
        }
        Ok(reclassified)
    }

    /// Number of items moved from `syncing` back to `pending` when this store opened
    pub const fn reclassified_on_open(&self) -> usize {
        self.reclassified_on_open
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
