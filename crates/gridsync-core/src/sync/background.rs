//! Background sync registration.
//!
//! Hosts that can wake the app for deferred work (a service worker with a
//! sync manager) get one tag per entity kind. Hosts without that capability
//! degrade silently: registration returns nothing and foreground sync keeps
//! working.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Why a background capability could not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("Background sync is not supported on this host")]
    Unsupported,

    #[error("Service worker registration failed: {0}")]
    Registration(String),

    #[error("Background sync tag {tag} was rejected: {reason}")]
    TagRejected { tag: String, reason: String },
}

/// Host facility that installs service workers.
#[async_trait]
pub trait ServiceWorkerRuntime: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Install (or update) the worker script.
    async fn register(
        &self,
        script_url: &str,
    ) -> Result<Arc<dyn WorkerRegistration>, CapabilityError>;

    /// The active registration once the worker is ready.
    async fn ready(&self) -> Result<Arc<dyn WorkerRegistration>, CapabilityError>;
}

/// An installed worker.
pub trait WorkerRegistration: Send + Sync {
    /// `None` when the host has no background sync manager.
    fn sync_manager(&self) -> Option<&dyn BackgroundSyncManager>;
}

#[async_trait]
pub trait BackgroundSyncManager: Send + Sync {
    async fn register(&self, tag: &str) -> Result<(), CapabilityError>;
}

/// Register the worker script.
///
/// Returns `Ok(None)` when the host has no service worker support at all.
pub async fn register_grid_service_worker(
    runtime: &dyn ServiceWorkerRuntime,
    script_url: &str,
) -> Result<Option<Arc<dyn WorkerRegistration>>, CapabilityError> {
    if !runtime.is_supported() {
        return Ok(None);
    }
    runtime.register(script_url).await.map(Some)
}

/// Register each tag, skipping the ones the host rejects.
///
/// Returns the tags that were registered; empty when the registration has
/// no sync manager.
pub async fn register_background_sync_tags(
    registration: &dyn WorkerRegistration,
    tags: &[String],
) -> Vec<String> {
    let Some(manager) = registration.sync_manager() else {
        return Vec::new();
    };

    let mut registered = Vec::with_capacity(tags.len());
    for tag in tags {
        match manager.register(tag).await {
            Ok(()) => registered.push(tag.clone()),
            Err(error) => tracing::debug!("Skipping background sync tag {tag}: {error}"),
        }
    }
    registered
}

/// Registers the worker once and re-registers tags whenever connectivity
/// returns.
pub struct BackgroundSyncRegistrar {
    runtime: Arc<dyn ServiceWorkerRuntime>,
    script_url: String,
    tags: Vec<String>,
    registration: Mutex<Option<Arc<dyn WorkerRegistration>>>,
}

impl BackgroundSyncRegistrar {
    pub fn new(
        runtime: Arc<dyn ServiceWorkerRuntime>,
        script_url: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            runtime,
            script_url: script_url.into(),
            tags,
            registration: Mutex::new(None),
        }
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Install the worker and register all tags. Never fails; an unusable
    /// host yields an empty list.
    pub async fn start(&self) -> Vec<String> {
        let registration =
            match register_grid_service_worker(self.runtime.as_ref(), &self.script_url).await {
                Ok(Some(registration)) => registration,
                Ok(None) => {
                    tracing::info!("Service workers unavailable; background sync disabled");
                    return Vec::new();
                }
                Err(error) => {
                    tracing::warn!("{error}");
                    return Vec::new();
                }
            };

        *self.registration.lock().await = Some(Arc::clone(&registration));
        let registered = register_background_sync_tags(registration.as_ref(), &self.tags).await;
        tracing::info!("Registered background sync tags: {}", registered.join(", "));
        registered
    }

    /// Re-register tags after the host comes back online.
    pub async fn on_online(&self) -> Vec<String> {
        if !self.runtime.is_supported() {
            return Vec::new();
        }

        let cached = self.registration.lock().await.clone();
        let registration = match cached {
            Some(registration) => registration,
            None => match self.runtime.ready().await {
                Ok(registration) => registration,
                Err(error) => {
                    tracing::debug!("No ready service worker: {error}");
                    return Vec::new();
                }
            },
        };
        register_background_sync_tags(registration.as_ref(), &self.tags).await
    }
}

/// Runtime for hosts without service workers, such as the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoServiceWorker;

#[async_trait]
impl ServiceWorkerRuntime for NoServiceWorker {
    fn is_supported(&self) -> bool {
        false
    }

    async fn register(
        &self,
        _script_url: &str,
    ) -> Result<Arc<dyn WorkerRegistration>, CapabilityError> {
        Err(CapabilityError::Unsupported)
    }

    async fn ready(&self) -> Result<Arc<dyn WorkerRegistration>, CapabilityError> {
        Err(CapabilityError::Unsupported)
    }
}
