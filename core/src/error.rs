//! Error taxonomy shared by the coordinator, the pipelines and the request
//! surface.
//!
//! `NotFound`, `Conflict`, `LockTimeout` and `ValidationFailure` surface
//! immediately and are never retried. `PersistenceFailure` is retried by the
//! batch pipelines and compensated or logged on exhaustion. `PublishFailure`
//! after a commit is reported without reverting the commit.

use crate::delivery::{ParseRiderKindError, RiderConflict};
use crate::envelope::EnvelopeError;
use crate::ids::{MerchantOrderId, ParseMerchantOrderIdError};
use crate::lock::LockError;
use crate::message_bus::MessageBusError;
use crate::state_store::StoreError;
use crate::status::{OrderStatus, ParseStatusError};
use thiserror::Error;

/// Failure of a delivery operation.
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    /// No record in the expected state.
    #[error("Order '{merchant_order_id}' has no delivery in {expected}")]
    NotFound {
        /// Order looked up.
        merchant_order_id: MerchantOrderId,
        /// Status the operation required.
        expected: OrderStatus,
    },

    /// The record changed underneath the caller.
    #[error("Order '{merchant_order_id}' was modified concurrently")]
    Conflict {
        /// Order whose update lost the race.
        merchant_order_id: MerchantOrderId,
    },

    /// Another request is already processing this order.
    #[error("Order '{merchant_order_id}' is already being processed")]
    LockTimeout {
        /// Order whose lock could not be taken.
        merchant_order_id: MerchantOrderId,
    },

    /// The state store or lock backend failed.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// The change was committed but its event could not be published.
    #[error("Publish failure: {0}")]
    PublishFailure(String),

    /// The request or message is malformed.
    #[error("Validation failure: {0}")]
    ValidationFailure(String),
}

impl DeliveryError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
            Self::PublishFailure(_) => "PUBLISH_FAILURE",
            Self::ValidationFailure(_) => "VALIDATION_FAILURE",
        }
    }

    /// Whether a batch pipeline may retry after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceFailure(_))
    }
}

impl From<StoreError> for DeliveryError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Constraint(reason) => Self::ValidationFailure(reason),
            other => Self::PersistenceFailure(other.to_string()),
        }
    }
}

impl From<LockError> for DeliveryError {
    fn from(error: LockError) -> Self {
        Self::PersistenceFailure(error.to_string())
    }
}

impl From<MessageBusError> for DeliveryError {
    fn from(error: MessageBusError) -> Self {
        Self::PublishFailure(error.to_string())
    }
}

impl From<EnvelopeError> for DeliveryError {
    fn from(error: EnvelopeError) -> Self {
        Self::PublishFailure(error.to_string())
    }
}

impl From<RiderConflict> for DeliveryError {
    fn from(error: RiderConflict) -> Self {
        Self::ValidationFailure(error.to_string())
    }
}

impl From<ParseRiderKindError> for DeliveryError {
    fn from(error: ParseRiderKindError) -> Self {
        Self::ValidationFailure(error.to_string())
    }
}

impl From<ParseStatusError> for DeliveryError {
    fn from(error: ParseStatusError) -> Self {
        Self::ValidationFailure(error.to_string())
    }
}

impl From<ParseMerchantOrderIdError> for DeliveryError {
    fn from(error: ParseMerchantOrderIdError) -> Self {
        Self::ValidationFailure(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let id = MerchantOrderId::new("M1");
        assert_eq!(
            DeliveryError::NotFound {
                merchant_order_id: id.clone(),
                expected: OrderStatus::OrderCooking,
            }
            .code(),
            "NOT_FOUND"
        );
        assert_eq!(DeliveryError::Conflict { merchant_order_id: id.clone() }.code(), "CONFLICT");
        assert_eq!(DeliveryError::LockTimeout { merchant_order_id: id }.code(), "LOCK_TIMEOUT");
        assert_eq!(DeliveryError::PublishFailure(String::new()).code(), "PUBLISH_FAILURE");
    }

    #[test]
    fn only_persistence_failures_are_retryable() {
        assert!(DeliveryError::PersistenceFailure("db down".into()).is_retryable());
        assert!(!DeliveryError::ValidationFailure("bad".into()).is_retryable());
        assert!(
            !DeliveryError::Conflict {
                merchant_order_id: MerchantOrderId::new("M1")
            }
            .is_retryable()
        );
    }

    #[test]
    fn layer_errors_map_into_taxonomy() {
        let store: DeliveryError = StoreError::Database("timeout".into()).into();
        assert_eq!(store.code(), "PERSISTENCE_FAILURE");

        let constraint: DeliveryError = StoreError::Constraint("two riders".into()).into();
        assert_eq!(constraint.code(), "VALIDATION_FAILURE");

        let bus: DeliveryError = MessageBusError::PublishFailed {
            topic: "status-change".into(),
            reason: "broker gone".into(),
        }
        .into();
        assert_eq!(bus.code(), "PUBLISH_FAILURE");
        assert!(bus.to_string().contains("status-change"));
    }

    #[test]
    fn not_found_message_names_expected_status() {
        let error = DeliveryError::NotFound {
            merchant_order_id: MerchantOrderId::new("M3"),
            expected: OrderStatus::OrderDelivering,
        };
        assert_eq!(error.to_string(), "Order 'M3' has no delivery in ORDER_DELIVERING");
    }
}
