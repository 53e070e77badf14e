//! HTTP handlers for storage notifications and direct uploads.
//! Both feed the shared `EventProcessor`, so both are deduplicated by the
//! same in-process guard.

use crate::{
    errors::AppError,
    models::{
        event::{NotificationEvent, NotificationPayload},
        object::basename,
    },
    services::{
        event_processor::{EventError, EventOutcome, EventProcessor},
        storage_service::StorageError,
    },
};
use axum::{
    Json,
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<EventProcessor>,
    /// Bucket direct uploads are written to.
    pub upload_bucket: String,
}

/// JSON body returned for every successfully handled request.
#[derive(Serialize, Debug, Default, PartialEq)]
pub struct EventResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Where a direct upload stored the original.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl From<EventOutcome> for EventResponse {
    fn from(outcome: EventOutcome) -> Self {
        match outcome {
            EventOutcome::Processed { bucket, path } => Self {
                status: "processed",
                bucket: Some(bucket),
                path: Some(path),
                ..Self::default()
            },
            EventOutcome::Duplicate { key } => Self {
                status: "duplicate",
                key: Some(key.to_string()),
                ..Self::default()
            },
            EventOutcome::Skipped { reason } => Self {
                status: "skipped",
                reason: Some(reason),
                ..Self::default()
            },
        }
    }
}

/// `POST /` and `POST /events`: a CloudEvent carrying a storage object.
///
/// Accepts binary content mode (the object as the body, `ce-*` headers) and
/// structured mode (`{"data": {...}}`).
pub async fn handle_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<EventResponse>, AppError> {
    if let Some(id) = headers.get("ce-id").and_then(|v| v.to_str().ok()) {
        debug!(
            "cloudevent id={} type={}",
            id,
            headers
                .get("ce-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
        );
    }

    let payload = NotificationPayload::from_json(&body).map_err(EventError::from)?;
    let outcome = state.processor.handle_payload(payload).await?;
    Ok(Json(EventResponse::from(outcome)))
}

/// `POST /upload`: multipart upload of a single image.
///
/// The first field with a filename is stored in the upload bucket under its
/// basename, then processed like a notification for the new generation.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<EventResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {}", err)))?
    {
        let Some(filename) = field.file_name().map(upload_name) else {
            continue;
        };
        let content_type = field
            .content_type()
            .filter(|ct| ct.starts_with("image/"))
            .map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("failed to read upload: {}", err)))?;
        upload = Some((filename, content_type, data));
        break;
    }

    let (filename, content_type, data) =
        upload.ok_or_else(|| AppError::bad_request("multipart body has no file field"))?;
    if filename.is_empty() {
        return Err(AppError::bad_request("uploaded file has an empty filename"));
    }

    let stored = state
        .processor
        .store()
        .put(&state.upload_bucket, &filename, data, content_type.as_deref())
        .await
        .map_err(|err| match err {
            StorageError::InvalidObjectKey | StorageError::InvalidBucketName { .. } => {
                AppError::bad_request(err.to_string())
            }
            other => AppError::internal(format!("failed to store upload: {}", other)),
        })?;

    let mut event = NotificationEvent::new(&stored.bucket, &stored.key, stored.generation);
    event.content_type = stored.content_type.clone();
    let outcome = state.processor.handle(event).await?;

    let mut response = EventResponse::from(outcome);
    response.source = Some(format!("{}/{}", stored.bucket, stored.key));
    Ok(Json(response))
}

/// Fallback for unknown routes, rendered like every other error.
pub async fn not_found() -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "no such route")
}

/// Browsers may send a full client path as the filename; keep its last segment.
fn upload_name(raw: &str) -> String {
    basename(raw).rsplit('\\').next().unwrap_or_default().trim().to_string()
}
