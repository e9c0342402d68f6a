//! Liveness, readiness and metrics.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use castellan_cache::CACHE_METRICS;
use castellan_policy::metrics::METRICS;
use serde::Serialize;
use tracing::warn;

use crate::app::AppState;

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub cache: &'static str,
    pub source: &'static str,
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// 503 unless both the cache store and the source of record answer.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let cache_ok = match state.cache.health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "cache health check failed");
            false
        }
    };
    let source_ok = match state.admin.source().ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "source of record health check failed");
            false
        }
    };

    let label = |ok: bool| if ok { "ok" } else { "unavailable" };
    let status = if cache_ok && source_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(Readiness {
            status: label(cache_ok && source_ok),
            cache: label(cache_ok),
            source: label(source_ok),
        }),
    )
}

/// Prometheus text exposition of decision and cache counters.
pub async fn metrics() -> impl IntoResponse {
    let mut body = METRICS.export_prometheus();
    body.push_str(&CACHE_METRICS.export_prometheus());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
