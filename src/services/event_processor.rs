//! Single-object pipeline driven by "object created" notifications.
//!
//! validate → skip foreign objects → dedupe → fetch → thumbnail → upload.
//! Once a key has been marked it stays marked, whatever happens later in the
//! pipeline; a failed fetch or upload is not retried within this process.

use crate::{
    errors::AppError,
    models::event::{IdempotencyKey, NotificationEvent, NotificationPayload, ValidationError},
    services::{
        classifier::is_image_key,
        idempotency::IdempotencyGuard,
        object_store::ObjectStore,
        path_namer::PathNamer,
        storage_service::StorageError,
        thumbnailer::{ThumbnailError, Thumbnailer},
    },
};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Processed { bucket: String, path: String },
    Duplicate { key: IdempotencyKey },
    Skipped { reason: String },
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid notification: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to fetch {bucket}/{key}: {source}")]
    Fetch {
        bucket: String,
        key: String,
        source: StorageError,
    },
    #[error(transparent)]
    Thumbnail(#[from] ThumbnailError),
    #[error("failed to upload {bucket}/{key}: {source}")]
    Upload {
        bucket: String,
        key: String,
        source: StorageError,
    },
}

impl EventError {
    /// Client errors for bad input, malformed images and missing objects;
    /// server errors for everything the caller cannot fix.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EventError::Validation(_) => StatusCode::BAD_REQUEST,
            EventError::Fetch { source, .. } if source.is_not_found() => StatusCode::NOT_FOUND,
            EventError::Fetch {
                source: StorageError::InvalidBucketName { .. } | StorageError::InvalidObjectKey,
                ..
            } => StatusCode::BAD_REQUEST,
            EventError::Fetch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EventError::Thumbnail(ThumbnailError::Decode(_)) => StatusCode::BAD_REQUEST,
            EventError::Thumbnail(ThumbnailError::Encode(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            EventError::Upload { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EventError> for AppError {
    fn from(err: EventError) -> Self {
        AppError::new(err.status_code(), err.to_string())
    }
}

pub struct EventProcessor {
    store: Arc<dyn ObjectStore>,
    guard: IdempotencyGuard,
    thumbnailer: Thumbnailer,
    namer: PathNamer,
    output_bucket: Option<String>,
}

impl EventProcessor {
    /// Thumbnails land in `output_bucket`, or in the source object's bucket
    /// when none is configured.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        thumbnailer: Thumbnailer,
        namer: PathNamer,
        output_bucket: Option<String>,
    ) -> Self {
        Self {
            store,
            guard: IdempotencyGuard::new(),
            thumbnailer,
            namer,
            output_bucket,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    pub async fn handle_payload(
        &self,
        payload: NotificationPayload,
    ) -> Result<EventOutcome, EventError> {
        let event = payload.validate()?;
        self.handle(event).await
    }

    pub async fn handle(&self, event: NotificationEvent) -> Result<EventOutcome, EventError> {
        self.handle_at(event, Utc::now()).await
    }

    #[instrument(
        skip_all,
        fields(bucket = %event.bucket, object = %event.object_name, generation = event.generation)
    )]
    pub async fn handle_at(
        &self,
        event: NotificationEvent,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome, EventError> {
        if PathNamer::is_output_key(&event.object_name) {
            return Ok(EventOutcome::Skipped {
                reason: "object is a generated thumbnail".into(),
            });
        }
        if !is_image_key(&event.object_name, event.content_type.as_deref()) {
            return Ok(EventOutcome::Skipped {
                reason: "object is not an image".into(),
            });
        }

        let key = event.idempotency_key();
        if !self.guard.check_and_mark(&key) {
            info!("duplicate notification for {}, skipping", key);
            return Ok(EventOutcome::Duplicate { key });
        }

        let raw = self
            .store
            .get(&event.bucket, &event.object_name)
            .await
            .map_err(|source| EventError::Fetch {
                bucket: event.bucket.clone(),
                key: event.object_name.clone(),
                source,
            })
            .inspect_err(|err| warn!("{}", err))?;

        let thumb = self
            .thumbnailer
            .render(raw)
            .await
            .inspect_err(|err| warn!("thumbnail for {} failed: {}", key, err))?;

        let bucket = self
            .output_bucket
            .clone()
            .unwrap_or_else(|| event.bucket.clone());
        let path = self.namer.output_path(now, &event.object_name, None);
        let content_type = thumb.content_type();

        self.store
            .put(&bucket, &path, thumb.bytes, Some(content_type))
            .await
            .map_err(|source| EventError::Upload {
                bucket: bucket.clone(),
                key: path.clone(),
                source,
            })
            .inspect_err(|err| warn!("{}", err))?;

        info!(
            "processed {} -> {}/{} ({}x{})",
            key, bucket, path, thumb.width, thumb.height
        );
        Ok(EventOutcome::Processed { bucket, path })
    }
}
