//! Sync settings for client apps.
//!
//! Settings come from an optional JSON file under the user's config
//! directory, with `GRIDSYNC_*` environment variables layered on top.
//! API tokens are only ever read from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::EntityType;
use crate::util::{is_http_url, non_blank};

pub const DEFAULT_RETRY_BUDGET: u32 = 3;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SERVICE_WORKER_SCRIPT: &str = "/sw.js";

const ENV_API_BASE_URL: &str = "GRIDSYNC_API_BASE_URL";
const ENV_API_TOKEN: &str = "GRIDSYNC_API_TOKEN";
const ENV_RETRY_BUDGET: &str = "GRIDSYNC_RETRY_BUDGET";
const ENV_DB_PATH: &str = "GRIDSYNC_DB_PATH";

/// Tags registered with the background sync runtime, one per entity type.
pub fn default_background_sync_tags() -> Vec<String> {
    [
        EntityType::Ticket,
        EntityType::TimeEntry,
        EntityType::Assessment,
        EntityType::Expense,
        EntityType::Photo,
    ]
    .iter()
    .map(|entity| entity.sync_tag().to_string())
    .collect()
}

/// Bounds applied to photos before they are queued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct PhotoCompression {
    /// Photos at or below this size are queued untouched
    pub max_bytes: usize,
    /// Longest edge after re-encoding
    pub max_dimension: u32,
    /// JPEG quality used when re-encoding (1-100)
    pub jpeg_quality: u8,
}

impl Default for PhotoCompression {
    fn default() -> Self {
        Self {
            max_bytes: 2 * 1024 * 1024,
            max_dimension: 2048,
            jpeg_quality: 80,
        }
    }
}

/// Runtime settings for the sync core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SyncSettings {
    /// Base URL of the remote mutation endpoint
    pub api_base_url: Option<String>,
    /// Bearer token for the remote endpoint (environment only)
    #[serde(skip)]
    pub api_token: Option<String>,
    /// Location of the durable store
    pub db_path: Option<PathBuf>,
    /// Failed attempts allowed before an item becomes a conflict
    pub retry_budget: u32,
    /// Period of the refresh/sync tick
    pub refresh_interval_secs: u64,
    /// Bound on each replay or upload request
    pub request_timeout_secs: u64,
    /// Script registered with the service-worker runtime
    pub service_worker_script: String,
    /// Background sync tags to register
    pub background_sync_tags: Vec<String>,
    /// Photo compression bounds
    pub photo_compression: PhotoCompression,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            db_path: None,
            retry_budget: DEFAULT_RETRY_BUDGET,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            service_worker_script: DEFAULT_SERVICE_WORKER_SCRIPT.to_string(),
            background_sync_tags: default_background_sync_tags(),
            photo_compression: PhotoCompression::default(),
        }
    }
}

impl SyncSettings {
    /// Default settings file: `<config dir>/gridsync/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gridsync").join("config.json"))
    }

    /// Default store location: `<local data dir>/gridsync/gridsync.db`.
    pub fn default_db_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("gridsync").join("gridsync.db"))
    }

    /// Load settings from `path` (or the default path), apply environment
    /// overrides and validate.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let settings = match path {
            Some(path) if path.exists() => {
                let payload = std::fs::read_to_string(&path)?;
                tracing::debug!("Loaded sync settings from {}", path.display());
                Self::from_json(&payload)?
            }
            _ => Self::default(),
        };

        let settings = settings.with_env_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a JSON payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid settings JSON: {error}")))
    }

    /// Layer `GRIDSYNC_*` variables from `lookup` over these settings.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        if let Some(url) = non_blank(lookup(ENV_API_BASE_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = non_blank(lookup(ENV_API_TOKEN)) {
            self.api_token = Some(token);
        }
        if let Some(budget) = non_blank(lookup(ENV_RETRY_BUDGET)) {
            self.retry_budget = budget.parse().map_err(|_| {
                Error::Config(format!("{ENV_RETRY_BUDGET} must be a positive integer"))
            })?;
        }
        if let Some(path) = non_blank(lookup(ENV_DB_PATH)) {
            self.db_path = Some(PathBuf::from(path));
        }
        Ok(self)
    }

    /// Check value ranges and normalize the API base URL.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.api_base_url {
            if !is_http_url(url.trim()) {
                return Err(Error::Config(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.retry_budget == 0 {
            return Err(Error::Config("retry_budget must be at least 1".to_string()));
        }
        if self.refresh_interval_secs == 0 {
            return Err(Error::Config(
                "refresh_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if !(1..=100).contains(&self.photo_compression.jpeg_quality) {
            return Err(Error::Config(
                "photo_compression.jpeg_quality must be between 1 and 100".to_string(),
            ));
        }
        if self.photo_compression.max_dimension == 0 {
            return Err(Error::Config(
                "photo_compression.max_dimension must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Store location from settings, falling back to the platform default.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        self.db_path
            .clone()
            .or_else(Self::default_db_path)
            .ok_or_else(|| {
                Error::Config("could not determine a data directory for the store".to_string())
            })
    }
}
