//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness from the backend's own probes

use crate::handlers::object_handlers::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse { status: "ok" }),
    )
}

/// `GET /readyz`
///
/// HTTP 200 when every backend probe passes, HTTP 503 otherwise. Backends
/// without probes are always ready.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let probes = state.repository.backend().readiness().await;
    let overall_ok = probes.iter().all(|probe| probe.error.is_none());

    let checks = probes
        .into_iter()
        .map(|probe| {
            (
                probe.name,
                CheckStatus {
                    ok: probe.error.is_none(),
                    error: probe.error,
                },
            )
        })
        .collect();

    let (status, label) = if overall_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    };
    (status, Json(ReadyResponse { status: label, checks }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
