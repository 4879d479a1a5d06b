//! Order events exchanged over the message bus.
//!
//! [`OrderEvent`] is the transport schema; [`DeliveryRecord`] is the storage
//! schema. They convert into each other but are kept apart so a change to one
//! does not silently reshape the other.
//!
//! # Wire format
//!
//! Field names follow the order service's JSON (`merchantUid`,
//! `riderUserUid`, `deliveryAcceptTime`, ...). The names `merchantOrderId`,
//! `acceptedAt` and `deliveredAt` are accepted as input aliases. Timestamps
//! are ISO-8601 local date-times without an offset.
//!
//! ```
//! use delivery_core::event::OrderEvent;
//! use delivery_core::status::OrderStatus;
//!
//! let event: OrderEvent = serde_json::from_str(r#"{
//!     "merchantUid": "M1",
//!     "status": "ORDER_COOKING",
//!     "addressStart": "Kitchen St 1",
//!     "addressDestination": "Home Ave 2",
//!     "deliveryAcceptTime": null
//! }"#).unwrap();
//!
//! assert_eq!(event.status, OrderStatus::OrderCooking);
//! assert_eq!(event.rider(), Ok(None));
//! ```

use crate::delivery::{DeliveryRecord, NewDelivery, RiderConflict, RiderIdentity};
use crate::ids::MerchantOrderId;
use crate::status::OrderStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// An order lifecycle event as carried on the bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// External correlation key.
    #[serde(rename = "merchantUid", alias = "merchantOrderId")]
    pub merchant_order_id: MerchantOrderId,

    /// Lifecycle status carried by the event.
    pub status: OrderStatus,

    /// Rider id when the rider uses a local account.
    #[serde(rename = "riderUserUid", default)]
    pub rider_user_uid: Option<i64>,

    /// Rider id when the rider uses a social login.
    #[serde(rename = "riderSocialUid", default)]
    pub rider_social_uid: Option<i64>,

    /// Pickup address.
    #[serde(rename = "addressStart", default)]
    pub address_start: Option<String>,

    /// Drop-off address.
    #[serde(rename = "addressDestination", default)]
    pub address_destination: Option<String>,

    /// When the rider accepted the order.
    #[serde(rename = "deliveryAcceptTime", alias = "acceptedAt", default)]
    pub accepted_at: Option<NaiveDateTime>,

    /// When the order was handed over.
    #[serde(rename = "deliveredTime", alias = "deliveredAt", default)]
    pub delivered_at: Option<NaiveDateTime>,
}

impl OrderEvent {
    /// Rider identity carried by the event.
    ///
    /// # Errors
    ///
    /// Returns [`RiderConflict`] if both identity kinds are set.
    pub const fn rider(&self) -> Result<Option<RiderIdentity>, RiderConflict> {
        RiderIdentity::join(self.rider_user_uid, self.rider_social_uid)
    }

    /// Copy of the event carrying another status.
    ///
    /// Used to stamp compensation messages with [`OrderStatus::COMPENSATION`].
    #[must_use]
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }
}

impl From<&DeliveryRecord> for OrderEvent {
    fn from(record: &DeliveryRecord) -> Self {
        let (rider_user_uid, rider_social_uid) = RiderIdentity::split(record.rider);
        Self {
            merchant_order_id: record.merchant_order_id.clone(),
            status: record.status,
            rider_user_uid,
            rider_social_uid,
            address_start: record.address_start.clone(),
            address_destination: record.address_destination.clone(),
            accepted_at: record.accepted_at,
            delivered_at: record.delivered_at,
        }
    }
}

impl From<DeliveryRecord> for OrderEvent {
    fn from(record: DeliveryRecord) -> Self {
        Self::from(&record)
    }
}

impl TryFrom<OrderEvent> for NewDelivery {
    type Error = RiderConflict;

    fn try_from(event: OrderEvent) -> Result<Self, Self::Error> {
        let rider = event.rider()?;
        Ok(Self {
            merchant_order_id: event.merchant_order_id,
            rider,
            status: event.status,
            address_start: event.address_start,
            address_destination: event.address_destination,
            accepted_at: event.accepted_at,
            delivered_at: event.delivered_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ids::{DeliveryId, Version};
    use chrono::NaiveDate;

    fn event() -> OrderEvent {
        OrderEvent {
            merchant_order_id: MerchantOrderId::new("M1"),
            status: OrderStatus::OrderCooking,
            rider_user_uid: None,
            rider_social_uid: None,
            address_start: Some("Kitchen St 1".to_string()),
            address_destination: Some("Home Ave 2".to_string()),
            accepted_at: None,
            delivered_at: None,
        }
    }

    #[test]
    fn serializes_with_order_service_field_names() {
        let accepted = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        let mut event = event();
        event.rider_social_uid = Some(42);
        event.accepted_at = Some(accepted);

        let json = serde_json::to_value(&event).expect("serialize");

        assert_eq!(json["merchantUid"], "M1");
        assert_eq!(json["status"], "ORDER_COOKING");
        assert_eq!(json["riderSocialUid"], 42);
        assert_eq!(json["riderUserUid"], serde_json::Value::Null);
        assert_eq!(json["deliveryAcceptTime"], "2025-01-01T12:30:00");
    }

    #[test]
    fn accepts_alias_field_names() {
        let parsed: OrderEvent = serde_json::from_value(serde_json::json!({
            "merchantOrderId": "M7",
            "status": "ORDER_DELIVERED",
            "deliveredAt": "2025-03-04T05:06:07"
        }))
        .expect("deserialize");

        assert_eq!(parsed.merchant_order_id.as_str(), "M7");
        assert_eq!(parsed.status, OrderStatus::OrderDelivered);
        assert!(parsed.delivered_at.is_some());
        assert_eq!(parsed.address_start, None);
    }

    #[test]
    fn missing_status_is_rejected() {
        let parsed = serde_json::from_value::<OrderEvent>(serde_json::json!({
            "merchantUid": "M7"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn conflicting_rider_fields_fail_conversion() {
        let mut event = event();
        event.rider_user_uid = Some(1);
        event.rider_social_uid = Some(2);

        assert!(NewDelivery::try_from(event).is_err());
    }

    #[test]
    fn record_converts_to_event_without_version() {
        let record = NewDelivery::try_from(event())
            .expect("valid event")
            .into_record(DeliveryId::new(5))
            .with_rider(RiderIdentity::User(3))
            .with_version(Version::new(4));

        let event = OrderEvent::from(&record);

        assert_eq!(event.rider_user_uid, Some(3));
        assert_eq!(event.rider_social_uid, None);
        assert_eq!(event.merchant_order_id, record.merchant_order_id);
        assert_eq!(event.status, OrderStatus::OrderCooking);
    }

    #[test]
    fn with_status_stamps_compensation() {
        let stamped = event().with_status(OrderStatus::COMPENSATION);
        assert_eq!(stamped.status, OrderStatus::OrderConfirmed);
    }
}
