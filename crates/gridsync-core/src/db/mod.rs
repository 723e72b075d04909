//! Durable local store

mod conflict_repository;
mod connection;
mod counters;
mod migrations;
mod photo_repository;
mod queue_repository;

pub use conflict_repository::{
    ConflictRepository, ConflictResolution, EscalationReason, SqliteConflictRepository,
};
pub use connection::Database;
pub use counters::{load_counters, record_last_synced_at, SyncCounters};
pub use photo_repository::{PhotoRepository, SqlitePhotoRepository};
pub use queue_repository::{QueueRepository, SqliteQueueRepository};

use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::Row;
use serde_json::Value;

use crate::error::Result;

/// Read a text column and parse it into a domain value.
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error)))
}

/// Like [`parse_column`] for nullable columns.
fn parse_optional_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        value.parse().map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error))
        })
    })
    .transpose()
}

/// Encode a payload as JSON text. Binding a `Value` directly would store a
/// JSON `null` as SQL NULL.
fn json_text(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn optional_json_text(value: Option<&Value>) -> Result<Option<String>> {
    value.map(json_text).transpose()
}

/// Read a JSON text column written by [`json_text`].
fn parse_json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let raw: String = row.get(idx)?;
    decode_json(&raw, idx)
}

fn parse_optional_json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| decode_json(&value, idx)).transpose()
}

fn decode_json(raw: &str, idx: usize) -> rusqlite::Result<Value> {
    serde_json::from_str(raw)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error)))
}
