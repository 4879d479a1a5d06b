//! Delivery transition and listing endpoints.
//!
//! - `POST /api/deliveries/start`
//! - `POST /api/deliveries/complete`
//! - `GET /api/deliveries/cooking`
//! - `GET /api/deliveries/delivering?kind=user|social&id=n`

use crate::WebResult;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use delivery_core::command::{CompleteDelivery, StartDelivery, TransitionResponse};
use delivery_core::event::OrderEvent;
use serde::Deserialize;

/// Query string of the delivering listing.
#[derive(Debug, Deserialize)]
pub struct RiderFilter {
    /// `user` or `social`.
    pub kind: String,
    /// Rider id of that kind.
    pub id: i64,
}

/// Assign a rider to a cooked order.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/deliveries/start \
///   -H 'content-type: application/json' \
///   -d '{"merchantOrderId":"M1","riderIdentity":{"kind":"user","id":7},"acceptedAt":"2025-01-01T12:30:00"}'
/// # {"success":true,"message":"Delivery of order 'M1' started"}
/// ```
pub async fn start_delivery(
    State(state): State<AppState>,
    body: Result<Json<StartDelivery>, JsonRejection>,
) -> WebResult<Json<TransitionResponse>> {
    let Json(command) = body.map_err(|e| AppError::validation(e.body_text()))?;

    let record = state.coordinator.start_delivery(command).await?;
    Ok(Json(TransitionResponse::ok(format!(
        "Delivery of order '{}' started",
        record.merchant_order_id
    ))))
}

/// Mark a delivering order as handed over.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/deliveries/complete \
///   -H 'content-type: application/json' \
///   -d '{"merchantOrderId":"M1","deliveredAt":"2025-01-01T13:05:00"}'
/// ```
pub async fn complete_delivery(
    State(state): State<AppState>,
    body: Result<Json<CompleteDelivery>, JsonRejection>,
) -> WebResult<Json<TransitionResponse>> {
    let Json(command) = body.map_err(|e| AppError::validation(e.body_text()))?;

    let record = state.coordinator.complete_delivery(command).await?;
    Ok(Json(TransitionResponse::ok(format!(
        "Delivery of order '{}' completed",
        record.merchant_order_id
    ))))
}

/// Orders waiting for a rider.
pub async fn cooking_orders(State(state): State<AppState>) -> WebResult<Json<Vec<OrderEvent>>> {
    Ok(Json(state.queries.cooking_orders().await?))
}

/// Orders a rider is carrying.
pub async fn delivering_orders(
    State(state): State<AppState>,
    filter: Result<Query<RiderFilter>, QueryRejection>,
) -> WebResult<Json<Vec<OrderEvent>>> {
    let Query(filter) = filter.map_err(|e| AppError::validation(e.body_text()))?;
    Ok(Json(state.queries.delivering_orders(&filter.kind, filter.id).await?))
}
