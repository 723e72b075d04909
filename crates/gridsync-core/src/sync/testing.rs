//! Scriptable remote endpoint for processor and orchestrator tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::{PhotoUploadQueueItem, SyncQueueItem};
use crate::remote::{Ack, RemoteEndpoint, RemoteError};
use crate::services::SyncStore;

/// Answers every call with `Ok` unless an outcome was scripted for the key.
///
/// Mutations are keyed by `entity_id`, photos by `parent_entity_id`.
#[derive(Default)]
pub(crate) struct FakeRemote {
    calls: Mutex<Vec<String>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<Ack, RemoteError>>>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn script(&self, key: &str, outcomes: Vec<Result<Ack, RemoteError>>) {
        self.scripted
            .lock()
            .unwrap()
            .insert(key.to_string(), outcomes.into());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, key: &str) -> Result<Ack, RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(key.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Ack::default()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[async_trait]
impl RemoteEndpoint for FakeRemote {
    async fn replay(&self, item: &SyncQueueItem) -> Result<Ack, RemoteError> {
        self.respond(&item.entity_id).await
    }

    async fn upload_photo(
        &self,
        photo: &PhotoUploadQueueItem,
        _bytes: &[u8],
    ) -> Result<Ack, RemoteError> {
        self.respond(&photo.parent_entity_id).await
    }
}

/// Settles the item for `key` through the store while its request is in
/// flight, the way a second process sharing the database would, then reports
/// a transient failure.
pub(crate) struct SettlesDuringCall {
    store: SyncStore,
    key: String,
    calls: Mutex<Vec<String>>,
}

impl SettlesDuringCall {
    pub(crate) fn new(store: SyncStore, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteEndpoint for SettlesDuringCall {
    async fn replay(&self, item: &SyncQueueItem) -> Result<Ack, RemoteError> {
        self.calls.lock().unwrap().push(item.entity_id.clone());
        if item.entity_id == self.key {
            self.store.mark_synced(&item.id).await.unwrap();
            return transient("connection reset");
        }
        Ok(Ack::default())
    }

    async fn upload_photo(
        &self,
        photo: &PhotoUploadQueueItem,
        _bytes: &[u8],
    ) -> Result<Ack, RemoteError> {
        self.calls.lock().unwrap().push(photo.parent_entity_id.clone());
        if photo.parent_entity_id == self.key {
            self.store
                .mark_photo_uploaded(&photo.item.id, false)
                .await
                .unwrap();
            return transient("connection reset");
        }
        Ok(Ack::default())
    }
}

pub(crate) fn transient(message: &str) -> Result<Ack, RemoteError> {
    Err(RemoteError::Transient(message.to_string()))
}

pub(crate) fn rejected(message: &str) -> Result<Ack, RemoteError> {
    Err(RemoteError::PermanentValidation {
        status: 422,
        message: message.to_string(),
    })
}
