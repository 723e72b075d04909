//! Shared services for UI and CLI clients.

mod store;

pub use store::{StoreCounts, SyncStore};
