//! Deterministic test data.

use chrono::{NaiveDate, NaiveDateTime};
use delivery_core::delivery::{DeliveryRecord, NewDelivery, RiderIdentity};
use delivery_core::event::OrderEvent;
use delivery_core::ids::{DeliveryId, MerchantOrderId, Version};
use delivery_core::status::OrderStatus;

/// 2025-01-01 at `hour:minute:00`.
///
/// # Panics
///
/// Panics if `hour` or `minute` is out of range.
#[must_use]
#[allow(clippy::expect_used)]
pub fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, 1)
        .and_then(|day| day.and_hms_opt(hour, minute, 0))
        .expect("fixture time should be valid")
}

/// Default test time, 2025-01-01 12:00:00.
#[must_use]
pub fn test_time() -> NaiveDateTime {
    at(12, 0)
}

/// An `ORDER_COOKING` event without rider.
#[must_use]
pub fn cooking_event(merchant_order_id: &str) -> OrderEvent {
    OrderEvent {
        merchant_order_id: MerchantOrderId::new(merchant_order_id),
        status: OrderStatus::OrderCooking,
        rider_user_uid: None,
        rider_social_uid: None,
        address_start: Some("1 Kitchen Street".to_string()),
        address_destination: Some(format!("{merchant_order_id} Home Avenue")),
        accepted_at: None,
        delivered_at: None,
    }
}

/// A rollback event asking to move an order back to `ORDER_CONFIRMED`.
#[must_use]
pub fn rollback_event(merchant_order_id: &str) -> OrderEvent {
    cooking_event(merchant_order_id).with_status(OrderStatus::COMPENSATION)
}

/// A not-yet-persisted cooking record.
#[must_use]
pub fn new_cooking(merchant_order_id: &str) -> NewDelivery {
    NewDelivery {
        merchant_order_id: MerchantOrderId::new(merchant_order_id),
        rider: None,
        status: OrderStatus::OrderCooking,
        address_start: Some("1 Kitchen Street".to_string()),
        address_destination: Some(format!("{merchant_order_id} Home Avenue")),
        accepted_at: None,
        delivered_at: None,
    }
}

/// A stored cooking record with the given id and version.
#[must_use]
pub fn cooking_record(merchant_order_id: &str, id: i64, version: i64) -> DeliveryRecord {
    new_cooking(merchant_order_id)
        .into_record(DeliveryId::new(id))
        .with_version(Version::new(version))
}

/// A stored record picked up by `rider` at [`test_time`], version 1.
#[must_use]
pub fn delivering_record(merchant_order_id: &str, id: i64, rider: RiderIdentity) -> DeliveryRecord {
    cooking_record(merchant_order_id, id, 0)
        .picked_up(rider, test_time())
        .with_version(Version::new(1))
}
