//! Defines routes for the thumbnailing service.
//!
//! - `POST /`        storage "object finalized" CloudEvent
//! - `POST /events`  same, under an explicit path
//! - `POST /upload`  multipart direct upload of one image
//! - `GET  /healthz` liveness
//! - `GET  /readyz`  readiness

use crate::handlers::{
    health_handlers::{healthz, readyz},
    thumbnail_handlers::{AppState, handle_event, not_found, upload_image},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Upper bound on a direct upload; whole objects are buffered in memory.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // notification endpoints
        .route("/", post(handle_event))
        .route("/events", post(handle_event))
        .route(
            "/upload",
            post(upload_image).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .fallback(not_found)
}
