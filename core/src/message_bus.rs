//! Message bus abstraction for order lifecycle topics.
//!
//! The bus carries [`Envelope`]s between the order services and this
//! coordinator. Delivery is at-least-once: consumers must tolerate
//! duplicates, which the state store makes idempotent.
//!
//! ```text
//!  order-cooking ──► ingestor ──► batch writer ──► state store
//!                                      │
//!                                      └─(exhausted)─► status-change
//!  order-rollback ─► ingestor ──► rollback writer ─► state store
//!
//!  coordinator ──► state store ──► status-change
//! ```
//!
//! # Implementations
//!
//! - `InMemoryMessageBus` (in `delivery-testing`): records publishes, fans out to subscribers
//! - `RedpandaMessageBus` (in `delivery-redpanda`): Kafka-compatible production bus
//!
//! # Example
//!
//! ```rust,ignore
//! use delivery_core::envelope::Envelope;
//! use delivery_core::message_bus::MessageBus;
//! use futures::StreamExt;
//!
//! async fn example(bus: impl MessageBus) {
//!     let envelope = Envelope::try_from(&event)?;
//!     bus.publish("status-change", &envelope).await?;
//!
//!     let mut stream = bus.subscribe(&["order-cooking"]).await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(envelope) => handle(envelope),
//!             Err(e) => tracing::error!("Stream error: {}", e),
//!         }
//!     }
//! }
//! ```

use crate::envelope::{Envelope, EnvelopeError};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during message bus operations.
#[derive(Error, Debug, Clone)]
pub enum MessageBusError {
    /// Failed to connect to the bus.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Network or transport error while consuming.
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl From<EnvelopeError> for MessageBusError {
    fn from(error: EnvelopeError) -> Self {
        Self::Codec(error.to_string())
    }
}

/// Stream of envelopes from a subscription.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<Envelope, MessageBusError>> + Send>>;

/// Publish/subscribe over durable topics.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be shared as `Arc<dyn MessageBus>` by the batch writer, the
/// coordinator and the consumers.
pub trait MessageBus: Send + Sync {
    /// Publish an envelope to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::PublishFailed`] if the broker did not accept
    /// the message.
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), MessageBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of envelopes.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::SubscriptionFailed`] if the subscription
    /// could not be established.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EnvelopeStream, MessageBusError>> + Send + '_>>;
}
