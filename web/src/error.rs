//! Error responses for delivery handlers.
//!
//! Every failure leaves the service as
//! `{"success": false, "code": "...", "message": "..."}` with a status
//! derived from the [`DeliveryError`] kind.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use delivery_core::error::DeliveryError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Vec<OrderEvent>>, AppError> {
///     Ok(Json(state.queries.cooking_orders().await?))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, code: &'static str, message: String) -> Self {
        Self { status, code, message }
    }

    /// 422 for a request body or query string that does not parse.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILURE", message.into())
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

/// Status for each error kind.
const fn status_for(error: &DeliveryError) -> StatusCode {
    match error {
        DeliveryError::NotFound { .. } => StatusCode::NOT_FOUND,
        DeliveryError::Conflict { .. } | DeliveryError::LockTimeout { .. } => StatusCode::CONFLICT,
        DeliveryError::ValidationFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DeliveryError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        DeliveryError::PublishFailure(_) => StatusCode::BAD_GATEWAY,
    }
}

impl From<DeliveryError> for AppError {
    fn from(error: DeliveryError) -> Self {
        Self::new(status_for(&error), error.code(), error.to_string())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, code = self.code, message = %self.message, "Request failed");
        } else {
            tracing::debug!(status = %self.status, code = self.code, message = %self.message, "Request rejected");
        }
        metrics::counter!("delivery.http.errors", "code" => self.code).increment(1);

        let body = ErrorResponse {
            success: false,
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
