//! Identifier and version types for delivery records.
//!
//! This module defines strong types for the external order correlation key
//! (`MerchantOrderId`), the surrogate storage key (`DeliveryId`) and the
//! optimistic concurrency tag (`Version`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `MerchantOrderId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid merchant order id: {0}")]
pub struct ParseMerchantOrderIdError(String);

/// External unique identifier correlating all events and records of one order.
///
/// # Validation
///
/// - `FromStr::from_str()`: Validates input (rejects blank strings, trims whitespace)
/// - `From::from()` and `new()`: No validation (for trusted input such as database rows)
///
/// # Examples
///
/// ```
/// use delivery_core::ids::MerchantOrderId;
///
/// let id = MerchantOrderId::new("M1");
/// assert_eq!(id.as_str(), "M1");
///
/// let parsed: MerchantOrderId = " M2 ".parse().unwrap();
/// assert_eq!(parsed, MerchantOrderId::new("M2"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerchantOrderId(String);

impl MerchantOrderId {
    /// Create a new `MerchantOrderId` without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Consume the id and return the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MerchantOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MerchantOrderId {
    type Err = ParseMerchantOrderIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseMerchantOrderIdError(
                "merchant order id cannot be blank".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<String> for MerchantOrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MerchantOrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for MerchantOrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Surrogate storage key assigned by the state store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(i64);

impl DeliveryId {
    /// Wrap a raw key.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw key value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optimistic concurrency tag of a delivery record.
///
/// Records start at [`Version::INITIAL`] and every successful conditional
/// update moves the stored value to [`Version::next`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Version of a freshly inserted record.
    pub const INITIAL: Self = Self(0);

    /// Create a version from a raw value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw value (matches the `BIGINT` column).
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// The version a successful update produces.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Whether this is the version of a record that was never updated.
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}
