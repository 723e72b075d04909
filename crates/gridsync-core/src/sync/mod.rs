//! Queue processing and sync orchestration.

mod background;
mod compress;
mod orchestrator;
mod photo_queue;
mod replay;

#[cfg(test)]
pub(crate) mod testing;

pub use background::{
    register_background_sync_tags, register_grid_service_worker, BackgroundSyncManager,
    BackgroundSyncRegistrar, CapabilityError, NoServiceWorker, ServiceWorkerRuntime,
    WorkerRegistration,
};
pub use compress::{prepare_photo, PreparedPhoto};
pub use orchestrator::{
    spawn_ticker, PassSummary, PlatformEvent, SyncOrchestrator, SyncOutcome, SyncSnapshot,
    OFFLINE_MESSAGE,
};
pub use photo_queue::{enqueue_captured_photo, PhotoUploadQueue, ProcessSummary};
pub use replay::{ReplayProcessor, ReplaySummary};

use std::future::Future;
use std::time::Duration;

use crate::db::EscalationReason;
use crate::error::Error;
use crate::models::QueueItemId;
use crate::remote::{Ack, RemoteError};
use crate::services::SyncStore;
use crate::Result;

/// Run a remote call under a bound; running out of time is a transient failure.
async fn bounded<F>(limit: Duration, call: F) -> std::result::Result<Ack, RemoteError>
where
    F: Future<Output = std::result::Result<Ack, RemoteError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(RemoteError::timeout(limit)))
}

/// Record a failed remote call against its queue item.
///
/// Transient failures count one attempt and wait for the next pass.
/// Validation failures and divergence go straight to a conflict.
async fn settle_failure(
    store: &SyncStore,
    id: &QueueItemId,
    error: RemoteError,
    retry_budget: u32,
) -> Result<()> {
    match error {
        RemoteError::Transient(message) => {
            let item = store.mark_failed(id, &message).await?;
            tracing::debug!(
                "Queue item {id} failed (attempt {} of {retry_budget}): {message}",
                item.attempt_count
            );
            if item.is_exhausted(retry_budget) {
                store.create_conflict(id, retry_budget).await?;
            }
        }
        RemoteError::PermanentValidation { status, message } => {
            store
                .escalate(
                    id,
                    EscalationReason::PermanentFailure(format!("HTTP {status}: {message}")),
                    retry_budget,
                )
                .await?;
        }
        RemoteError::ConflictDetected {
            message,
            remote_payload,
        } => {
            store
                .escalate(
                    id,
                    EscalationReason::RemoteDiverged {
                        message,
                        remote_payload,
                    },
                    retry_budget,
                )
                .await?;
        }
    }
    Ok(())
}

/// The item changed underneath the pass (resolved, escalated or pruned).
const fn is_stale(error: &Error) -> bool {
    matches!(error, Error::InvalidTransition { .. } | Error::NotFound(_))
}
