//! Topic names shared with the order services.

/// An order was placed.
pub const ORDER_CREATED: &str = "order-created";
/// The kitchen started cooking; the batch pipeline persists these.
pub const ORDER_COOKING: &str = "order-cooking";
/// A rider picked the order up.
pub const ORDER_DELIVERING: &str = "order-delivering";
/// The order was delivered.
pub const ORDER_DELIVERED: &str = "order-delivered";
/// The order was cancelled.
pub const ORDER_CANCELLED: &str = "order-cancelled";
/// Status changes emitted by this service, including compensation.
pub const STATUS_CHANGE: &str = "status-change";
/// Rollback requests consumed by the rollback pipeline.
pub const ORDER_ROLLBACK: &str = "order-rollback";

/// Every topic of the order lifecycle.
pub const ALL: [&str; 7] = [
    ORDER_CREATED,
    ORDER_COOKING,
    ORDER_DELIVERING,
    ORDER_DELIVERED,
    ORDER_CANCELLED,
    STATUS_CHANGE,
    ORDER_ROLLBACK,
];
