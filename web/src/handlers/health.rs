//! Health check endpoints.
//!
//! `/health` answers liveness without touching dependencies. `/ready`
//! reports what each batch ingestor still holds in memory.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use delivery_runtime::{HealthReport, HealthStatus};

/// Liveness probe.
///
/// ```text
/// GET /health  ->  200 "ok"
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness probe with pending-buffer diagnostics.
///
/// # Status Codes
///
/// - 200 OK: Healthy or Degraded
/// - 503 Service Unavailable: Unhealthy
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "checks": [
///     {
///       "component": "order-cooking",
///       "status": "healthy",
///       "metadata": [["pending", "3"], ["batch_size", "5"], ["flush_interval_ms", "10000"]]
///     }
///   ],
///   "timestamp": "2025-01-01T12:00:00Z"
/// }
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = HealthReport::new(state.ingestors.iter().map(|i| i.health_check()).collect());

    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(report))
}
