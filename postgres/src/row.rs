//! Mapping between the `delivery` table and [`DeliveryRecord`].

use chrono::NaiveDateTime;
use delivery_core::delivery::{DeliveryRecord, NewDelivery, RiderIdentity};
use delivery_core::ids::{DeliveryId, MerchantOrderId, Version};
use delivery_core::state_store::StoreError;
use delivery_core::status::OrderStatus;

/// Column list shared by every `SELECT`, in [`DeliveryRow`] field order.
pub(crate) const COLUMNS: &str = "uid, merchant_uid, rider_user_uid, rider_social_uid, status, \
     address_start, address_destination, delivery_accept_time, delivered_time, version";

/// One row of the `delivery` table as stored.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DeliveryRow {
    /// Surrogate key.
    pub uid: i64,
    /// Merchant order id.
    pub merchant_uid: String,
    /// Rider id when the rider has a local account.
    pub rider_user_uid: Option<i64>,
    /// Rider id when the rider signed in socially.
    pub rider_social_uid: Option<i64>,
    /// Status string.
    pub status: String,
    /// Pickup address.
    pub address_start: Option<String>,
    /// Drop-off address.
    pub address_destination: Option<String>,
    /// When a rider accepted the order.
    pub delivery_accept_time: Option<NaiveDateTime>,
    /// When the order was handed over.
    pub delivered_time: Option<NaiveDateTime>,
    /// Optimistic concurrency tag.
    pub version: i64,
}

impl TryFrom<DeliveryRow> for DeliveryRecord {
    type Error = StoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::CorruptRow {
            merchant_order_id: row.merchant_uid.clone(),
            reason,
        };

        let status: OrderStatus = row.status.parse().map_err(|e| corrupt(format!("{e}")))?;
        let rider = RiderIdentity::join(row.rider_user_uid, row.rider_social_uid)
            .map_err(|e| corrupt(e.to_string()))?;

        Ok(Self {
            id: DeliveryId::new(row.uid),
            merchant_order_id: MerchantOrderId::new(row.merchant_uid),
            rider,
            status,
            address_start: row.address_start,
            address_destination: row.address_destination,
            accepted_at: row.delivery_accept_time,
            delivered_at: row.delivered_time,
            version: Version::new(row.version),
        })
    }
}

/// Column values bound by `INSERT` and `UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Columns<'a> {
    pub merchant_uid: &'a str,
    pub rider_user_uid: Option<i64>,
    pub rider_social_uid: Option<i64>,
    pub status: &'static str,
    pub address_start: Option<&'a str>,
    pub address_destination: Option<&'a str>,
    pub delivery_accept_time: Option<NaiveDateTime>,
    pub delivered_time: Option<NaiveDateTime>,
}

impl<'a> From<&'a NewDelivery> for Columns<'a> {
    fn from(record: &'a NewDelivery) -> Self {
        let (rider_user_uid, rider_social_uid) = RiderIdentity::split(record.rider);
        Self {
            merchant_uid: record.merchant_order_id.as_str(),
            rider_user_uid,
            rider_social_uid,
            status: record.status.as_str(),
            address_start: record.address_start.as_deref(),
            address_destination: record.address_destination.as_deref(),
            delivery_accept_time: record.accepted_at,
            delivered_time: record.delivered_at,
        }
    }
}

impl<'a> From<&'a DeliveryRecord> for Columns<'a> {
    fn from(record: &'a DeliveryRecord) -> Self {
        let (rider_user_uid, rider_social_uid) = RiderIdentity::split(record.rider);
        Self {
            merchant_uid: record.merchant_order_id.as_str(),
            rider_user_uid,
            rider_social_uid,
            status: record.status.as_str(),
            address_start: record.address_start.as_deref(),
            address_destination: record.address_destination.as_deref(),
            delivery_accept_time: record.accepted_at,
            delivered_time: record.delivered_at,
        }
    }
}
