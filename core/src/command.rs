//! Transition requests and their responses.

use crate::delivery::RiderIdentity;
use crate::ids::MerchantOrderId;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A rider picks up a cooked order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDelivery {
    /// Order to pick up.
    pub merchant_order_id: MerchantOrderId,
    /// Rider taking the order.
    pub rider_identity: RiderIdentity,
    /// When the rider accepted.
    pub accepted_at: NaiveDateTime,
}

/// A rider hands an order over.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteDelivery {
    /// Order being delivered.
    pub merchant_order_id: MerchantOrderId,
    /// When the order was handed over.
    pub delivered_at: NaiveDateTime,
}

/// Outcome reported to the caller of a transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionResponse {
    /// Whether the transition was applied.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
}

impl TransitionResponse {
    /// A successful outcome.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// A failed outcome.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
