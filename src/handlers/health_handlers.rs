//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness of the object store backend

use crate::{handlers::thumbnail_handlers::AppState, services::object_store::ReadinessCheck};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Very small liveness probe. Always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Runs the store's probes (for the local backend: `SELECT 1` against SQLite
/// and a write/read/delete under the storage directory). HTTP 200 when all
/// checks pass, HTTP 503 when any fails. Also reports how many idempotency
/// keys this process is holding.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let results = state.processor.store().readiness().await;
    let overall_ok = results.iter().all(|check| check.ok);

    let checks = results
        .into_iter()
        .map(|ReadinessCheck { name, ok, error }| (name, CheckStatus { ok, error }))
        .collect();

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
        tracked_keys: state.processor.guard().len(),
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
    tracked_keys: usize,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
