//! gridsync-core - Offline-first sync core for field crews
//!
//! This crate holds the durable mutation queue, conflict handling, the photo
//! upload queue and the sync orchestrator shared by every gridsync front end.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{
    EntityType, LocalSyncConflict, Operation, QueueItemId, QueueStatus, ResolutionStrategy,
    SyncQueueItem,
};
pub use services::SyncStore;
pub use state::SyncState;
