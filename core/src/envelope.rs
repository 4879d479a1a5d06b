//! Keyed message envelopes carried by the message bus.
//!
//! An [`Envelope`] is the bus-level unit: an opaque JSON payload plus the
//! partition key. Bus implementations never look inside the payload; encoding
//! and decoding happen at the edges through [`Envelope::json`] and
//! [`Envelope::decode`].

use crate::event::OrderEvent;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised while encoding or decoding an envelope payload.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The value could not be encoded as JSON.
    #[error("Failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload is not valid JSON for the requested type.
    #[error("Failed to decode payload with key '{key}': {source}")]
    Decode {
        /// Key of the offending message.
        key: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// A message as it travels over the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Partition key. For order events this is the merchant order id, which
    /// keeps every event of one order in the same partition.
    pub key: String,

    /// JSON payload bytes.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wrap already-encoded bytes.
    #[must_use]
    pub fn new(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }

    /// Encode `value` as JSON under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn json<T: Serialize + ?Sized>(key: impl Into<String>, value: &T) -> Result<Self, EnvelopeError> {
        let payload = serde_json::to_vec(value).map_err(EnvelopeError::Encode)?;
        Ok(Self::new(key, payload))
    }

    /// Decode the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        serde_json::from_slice(&self.payload).map_err(|source| EnvelopeError::Decode {
            key: self.key.clone(),
            source,
        })
    }

    /// Size of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl TryFrom<&OrderEvent> for Envelope {
    type Error = EnvelopeError;

    fn try_from(event: &OrderEvent) -> Result<Self, Self::Error> {
        Self::json(event.merchant_order_id.as_str(), event)
    }
}
