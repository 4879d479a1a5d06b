//! Persisted delivery records.
//!
//! A [`DeliveryRecord`] is the stored entity; it is never mutated in place.
//! Every change goes through a consuming `with_*` method that produces a new
//! value, and the state store decides whether that value wins by comparing
//! versions.

use crate::ids::{DeliveryId, MerchantOrderId, Version};
use crate::status::OrderStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned for an unknown rider kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown rider kind '{0}' (expected 'user' or 'social')")]
pub struct ParseRiderKindError(String);

/// The two mutually exclusive ways a rider can be identified.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiderKind {
    /// Rider registered with a local account.
    User,
    /// Rider signed in through a social login.
    Social,
}

impl RiderKind {
    /// Lowercase name used in query strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Social => "social",
        }
    }
}

impl FromStr for RiderKind {
    type Err = ParseRiderKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "social" => Ok(Self::Social),
            other => Err(ParseRiderKindError(other.to_string())),
        }
    }
}

impl fmt::Display for RiderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the rider carrying an order.
///
/// Serialized as `{"kind": "user", "id": 7}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum RiderIdentity {
    /// Local account id.
    User(i64),
    /// Social login id.
    Social(i64),
}

impl RiderIdentity {
    /// Build an identity from a kind and a raw id.
    #[must_use]
    pub const fn new(kind: RiderKind, id: i64) -> Self {
        match kind {
            RiderKind::User => Self::User(id),
            RiderKind::Social => Self::Social(id),
        }
    }

    /// Which kind of identity this is.
    #[must_use]
    pub const fn kind(self) -> RiderKind {
        match self {
            Self::User(_) => RiderKind::User,
            Self::Social(_) => RiderKind::Social,
        }
    }

    /// The raw id.
    #[must_use]
    pub const fn id(self) -> i64 {
        match self {
            Self::User(id) | Self::Social(id) => id,
        }
    }

    /// Split into the two nullable columns (`rider_user_uid`, `rider_social_uid`).
    #[must_use]
    pub const fn split(rider: Option<Self>) -> (Option<i64>, Option<i64>) {
        match rider {
            Some(Self::User(id)) => (Some(id), None),
            Some(Self::Social(id)) => (None, Some(id)),
            None => (None, None),
        }
    }

    /// Join the two nullable columns back into an identity.
    ///
    /// # Errors
    ///
    /// Returns [`RiderConflict`] when both columns are set.
    pub const fn join(user: Option<i64>, social: Option<i64>) -> Result<Option<Self>, RiderConflict> {
        match (user, social) {
            (Some(user), Some(social)) => Err(RiderConflict { user, social }),
            (Some(id), None) => Ok(Some(Self::User(id))),
            (None, Some(id)) => Ok(Some(Self::Social(id))),
            (None, None) => Ok(None),
        }
    }
}

/// Both rider identity kinds were present at once.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("rider identity is ambiguous: user {user} and social {social} are both set")]
pub struct RiderConflict {
    /// The user id that was supplied.
    pub user: i64,
    /// The social id that was supplied.
    pub social: i64,
}

/// A delivery record as held by the state store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Surrogate key.
    pub id: DeliveryId,
    /// External correlation key, unique across records.
    pub merchant_order_id: MerchantOrderId,
    /// Rider carrying the order, once one accepted it.
    pub rider: Option<RiderIdentity>,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Pickup address.
    pub address_start: Option<String>,
    /// Drop-off address.
    pub address_destination: Option<String>,
    /// When the rider accepted the order.
    pub accepted_at: Option<NaiveDateTime>,
    /// When the order was handed over.
    pub delivered_at: Option<NaiveDateTime>,
    /// Optimistic concurrency tag.
    pub version: Version,
}

impl DeliveryRecord {
    /// Copy with a new rider.
    #[must_use]
    pub fn with_rider(mut self, rider: RiderIdentity) -> Self {
        self.rider = Some(rider);
        self
    }

    /// Copy with a new status.
    #[must_use]
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    /// Copy with a new acceptance time.
    #[must_use]
    pub fn with_accepted_at(mut self, accepted_at: NaiveDateTime) -> Self {
        self.accepted_at = Some(accepted_at);
        self
    }

    /// Copy with a new delivery time.
    #[must_use]
    pub fn with_delivered_at(mut self, delivered_at: NaiveDateTime) -> Self {
        self.delivered_at = Some(delivered_at);
        self
    }

    /// Copy with a new version.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// The record a successful pickup produces. Version is left unchanged so
    /// it can be used as the expected version of the conditional update.
    #[must_use]
    pub fn picked_up(&self, rider: RiderIdentity, accepted_at: NaiveDateTime) -> Self {
        self.clone()
            .with_rider(rider)
            .with_status(OrderStatus::OrderDelivering)
            .with_accepted_at(accepted_at)
    }

    /// The record a successful hand-over produces (version unchanged).
    #[must_use]
    pub fn handed_over(&self, delivered_at: NaiveDateTime) -> Self {
        self.clone()
            .with_status(OrderStatus::OrderDelivered)
            .with_delivered_at(delivered_at)
    }
}

/// A record that has not been persisted yet.
///
/// The state store assigns the [`DeliveryId`] and starts the version at
/// [`Version::INITIAL`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewDelivery {
    /// External correlation key.
    pub merchant_order_id: MerchantOrderId,
    /// Rider, if the event already carried one.
    pub rider: Option<RiderIdentity>,
    /// Status carried by the ingested event.
    pub status: OrderStatus,
    /// Pickup address.
    pub address_start: Option<String>,
    /// Drop-off address.
    pub address_destination: Option<String>,
    /// Acceptance time, if any.
    pub accepted_at: Option<NaiveDateTime>,
    /// Delivery time, if any.
    pub delivered_at: Option<NaiveDateTime>,
}

impl NewDelivery {
    /// Attach the storage key assigned on insert.
    #[must_use]
    pub fn into_record(self, id: DeliveryId) -> DeliveryRecord {
        DeliveryRecord {
            id,
            merchant_order_id: self.merchant_order_id,
            rider: self.rider,
            status: self.status,
            address_start: self.address_start,
            address_destination: self.address_destination,
            accepted_at: self.accepted_at,
            delivered_at: self.delivered_at,
            version: Version::INITIAL,
        }
    }
}
