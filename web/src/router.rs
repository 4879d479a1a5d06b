//! Router for the delivery service.

use crate::handlers::{
    complete_delivery, cooking_orders, delivering_orders, health_check, readiness_check, start_delivery,
};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// Every request gets an `x-request-id` (kept when the caller sent one),
/// echoed on the response and recorded on the request span.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/deliveries/start", post(start_delivery))
        .route("/deliveries/complete", post(complete_delivery))
        .route("/deliveries/cooking", get(cooking_orders))
        .route("/deliveries/delivering", get(delivering_orders));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &axum::extract::Request| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    tracing::info_span!(
                        "http_request",
                        request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
