//! HTTP implementation of the remote mutation endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use super::{Ack, RemoteEndpoint, RemoteError};
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::models::{Operation, PhotoUploadQueueItem, SyncQueueItem};
use crate::util::{compact_text, is_http_url};

const IDEMPOTENCY_HEADER: &str = "idempotency-key";
const CONTENT_HASH_HEADER: &str = "x-content-sha256";
const PHOTO_TYPE_HEADER: &str = "x-photo-type";
const GPS_LATITUDE_HEADER: &str = "x-gps-latitude";
const GPS_LONGITUDE_HEADER: &str = "x-gps-longitude";

/// How a response status is treated by the sync core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Conflict,
    Transient,
    Permanent,
}

/// Classify an HTTP status code.
///
/// 409 means the remote entity diverged; 408, 429 and 5xx are worth retrying;
/// every other 4xx is a validation failure that retrying cannot fix.
pub const fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        409 => StatusClass::Conflict,
        408 | 429 | 500..=599 => StatusClass::Transient,
        400..=499 => StatusClass::Permanent,
        _ => StatusClass::Transient,
    }
}

/// HTTP client for the gridsync mutation API.
#[derive(Debug, Clone)]
pub struct HttpRemoteEndpoint {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpRemoteEndpoint {
    /// Builds a client for an explicit API base URL.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into().as_str())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("Failed to construct HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    /// Builds a client from sync settings; fails when no base URL is configured.
    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        let base_url = settings.api_base_url.clone().ok_or_else(|| {
            Error::Config(
                "api_base_url is not configured (set GRIDSYNC_API_BASE_URL)".to_string(),
            )
        })?;
        Self::new(base_url, settings.api_token.clone(), settings.request_timeout())
    }

    /// Returns the base URL this client was configured with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn mutation_route(&self, item: &SyncQueueItem) -> (Method, String) {
        let collection = format!("{}/v1/sync/{}", self.base_url, item.entity_type.as_str());
        let member = format!("{collection}/{}", urlencoding::encode(&item.entity_id));
        match item.operation {
            Operation::Create => (Method::POST, collection),
            Operation::Update => (Method::PATCH, member),
            Operation::Delete => (Method::DELETE, member),
        }
    }

    fn photo_route(&self, photo: &PhotoUploadQueueItem) -> String {
        format!(
            "{}/v1/photos/{}/{}/{}",
            self.base_url,
            photo.parent_entity_type.as_str(),
            urlencoding::encode(&photo.parent_entity_id),
            urlencoding::encode(&photo.item.entity_id)
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteEndpoint for HttpRemoteEndpoint {
    async fn replay(&self, item: &SyncQueueItem) -> std::result::Result<Ack, RemoteError> {
        let (method, url) = self.mutation_route(item);
        let mut request = self
            .authorize(self.client.request(method.clone(), &url))
            .header(IDEMPOTENCY_HEADER, item.id.as_str())
            .header("Accept", "application/json");
        if item.operation != Operation::Delete {
            request = request.json(&item.payload);
        }

        let response = request
            .send()
            .await
            .map_err(|error| RemoteError::Transient(format!("{method} {url} failed: {error}")))?;
        into_outcome(response).await
    }

    async fn upload_photo(
        &self,
        photo: &PhotoUploadQueueItem,
        bytes: &[u8],
    ) -> std::result::Result<Ack, RemoteError> {
        let url = self.photo_route(photo);
        let mut request = self
            .authorize(self.client.put(&url))
            .header(IDEMPOTENCY_HEADER, photo.item.id.as_str())
            .header(reqwest::header::CONTENT_TYPE, photo.mime_type.as_str())
            .header(CONTENT_HASH_HEADER, photo.content_hash.as_str())
            .header(PHOTO_TYPE_HEADER, photo.photo_type.as_str());
        if let Some(location) = photo.location {
            request = request
                .header(GPS_LATITUDE_HEADER, location.latitude.to_string())
                .header(GPS_LONGITUDE_HEADER, location.longitude.to_string());
        }
        let response = request
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|error| RemoteError::Transient(format!("Photo upload failed: {error}")))?;
        into_outcome(response).await
    }
}

async fn into_outcome(response: reqwest::Response) -> std::result::Result<Ack, RemoteError> {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let json: Option<Value> = serde_json::from_str(&body).ok();

    match classify_status(status) {
        StatusClass::Success => Ok(Ack { body: json }),
        StatusClass::Conflict => Err(RemoteError::ConflictDetected {
            message: format!("HTTP {status}: {}", compact_text(&body)),
            remote_payload: json.map(|value| value.get("remote").cloned().unwrap_or(value)),
        }),
        StatusClass::Transient => Err(RemoteError::Transient(format!(
            "HTTP {status}: {}",
            compact_text(&body)
        ))),
        StatusClass::Permanent => Err(RemoteError::PermanentValidation {
            status,
            message: compact_text(&body),
        }),
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let base = raw.trim().trim_end_matches('/').to_string();
    if base.is_empty() {
        return Err(Error::Config("API base URL must not be empty".to_string()));
    }
    if !is_http_url(&base) {
        return Err(Error::Config(
            "API base URL must include http:// or https://".to_string(),
        ));
    }
    Ok(base)
}
