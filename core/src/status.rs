//! Order lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a stored or received status string is unknown.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown order status: {0}")]
pub struct ParseStatusError(String);

/// Position of an order in its lifecycle.
///
/// ```text
/// PAYMENT_COMPLETED → ORDER_CONFIRMED → ORDER_COOKING → ORDER_DELIVERING → ORDER_DELIVERED
/// ```
///
/// `ORDER_CONFIRMED` doubles as the compensation target: failed batch writes
/// republish their messages with this status, and rollback events usually
/// carry it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Payment captured, order not yet accepted by the merchant.
    PaymentCompleted,
    /// Merchant accepted the order. Also the rollback target.
    OrderConfirmed,
    /// Kitchen is preparing the order; waiting for a rider.
    OrderCooking,
    /// A rider picked the order up.
    OrderDelivering,
    /// The order reached its destination.
    OrderDelivered,
}

impl OrderStatus {
    /// Every status in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::PaymentCompleted,
        Self::OrderConfirmed,
        Self::OrderCooking,
        Self::OrderDelivering,
        Self::OrderDelivered,
    ];

    /// Status stamped on messages whose batch could not be persisted.
    pub const COMPENSATION: Self = Self::OrderConfirmed;

    /// Stable string form used on the wire and in the `status` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PaymentCompleted => "PAYMENT_COMPLETED",
            Self::OrderConfirmed => "ORDER_CONFIRMED",
            Self::OrderCooking => "ORDER_COOKING",
            Self::OrderDelivering => "ORDER_DELIVERING",
            Self::OrderDelivered => "ORDER_DELIVERED",
        }
    }

    /// Lifecycle position, starting at 0.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::PaymentCompleted => 0,
            Self::OrderConfirmed => 1,
            Self::OrderCooking => 2,
            Self::OrderDelivering => 3,
            Self::OrderDelivered => 4,
        }
    }

    /// Whether `self` comes strictly later in the lifecycle than `other`.
    #[must_use]
    pub const fn is_after(self, other: Self) -> bool {
        self.rank() > other.rank()
    }

    /// Whether nothing follows this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::OrderDelivered)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}
