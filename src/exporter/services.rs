use axum::{
    Json,
    extract::State,
    http::header,
    response::IntoResponse,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;

use super::{error::ExporterError, state::ExporterState};

/// Prometheus scrape endpoint (GET /metrics)
///
/// Reads the gauge straight from the registry; the gauge is written inside
/// `MetricState`'s write section, so it always matches `read_current()`.
pub async fn metrics(State(state): State<ExporterState>) -> Result<impl IntoResponse, ExporterError> {
    let encoder = TextEncoder::new();
    let families = state.registry.gather();

    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;

    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub num_jobs: f64,
    pub seconds_since_update: f64,
    pub stale: bool,
}

/// Liveness endpoint with a snapshot of the gauge state (GET /health)
pub async fn health(State(state): State<ExporterState>) -> Json<HealthResponse> {
    let snapshot = state.metrics.snapshot();

    Json(HealthResponse {
        status: "ok",
        num_jobs: snapshot.value,
        seconds_since_update: snapshot.since_update.as_secs_f64(),
        stale: snapshot.stale,
    })
}
