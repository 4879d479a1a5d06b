//! Redpanda message bus for the delivery coordinator.
//!
//! Implements [`MessageBus`] from `delivery-core` over rdkafka, so it works
//! against Redpanda or any Kafka-compatible broker.
//!
//! # Wire format
//!
//! - **Key**: [`Envelope::key`], the merchant order id for order events
//! - **Payload**: [`Envelope::payload`], the JSON bytes as-is
//!
//! Keying by order id keeps every event of one order on one partition.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits. An offset is committed only
//! after the envelope reached the subscriber's channel; a crash before that
//! redelivers the message. The state store makes redelivery harmless.
//!
//! # Example
//!
//! ```no_run
//! use delivery_core::envelope::Envelope;
//! use delivery_core::message_bus::MessageBus;
//! use delivery_redpanda::RedpandaMessageBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaMessageBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("delivery-coordinator")
//!     .build()?;
//!
//! bus.publish("status-change", &Envelope::new("M1", b"{}".to_vec())).await?;
//!
//! let mut stream = bus.subscribe(&["order-cooking"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(envelope) => println!("Received order {}", envelope.key),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use delivery_core::envelope::Envelope;
use delivery_core::message_bus::{EnvelopeStream, MessageBus, MessageBusError};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default subscriber buffer.
const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Default producer send timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redpanda-backed [`MessageBus`].
///
/// One producer is shared by all publishes. Every [`MessageBus::subscribe`]
/// call creates its own consumer, owned by a background task that forwards
/// envelopes into a bounded channel.
pub struct RedpandaMessageBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaMessageBus {
    /// Create a bus with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, MessageBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start configuring a bus.
    #[must_use]
    pub fn builder() -> RedpandaMessageBusBuilder {
        RedpandaMessageBusBuilder::default()
    }

    /// Bootstrap servers this bus talks to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used by [`MessageBus::subscribe`] for `topics`.
    #[must_use]
    pub fn group_for(&self, topics: &[String]) -> String {
        consumer_group_id(self.consumer_group.as_deref(), topics)
    }
}

/// Builder for a [`RedpandaMessageBus`].
#[derive(Default)]
pub struct RedpandaMessageBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaMessageBusBuilder {
    /// Comma-separated bootstrap servers, e.g. `"localhost:9092"`.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`. Default `"all"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec. Default `"none"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group shared by every subscription.
    ///
    /// Instances of the coordinator sharing a group split the partitions
    /// between them. Without it the group is derived from the topic names.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Envelopes buffered between the consumer task and the subscriber.
    /// Zero is treated as one.
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Where a new consumer group starts reading: `"earliest"` or `"latest"`.
    /// Default `"earliest"`, so orders published before the first start are
    /// not skipped.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::ConnectionFailed`] if brokers are not set
    /// or the producer configuration is rejected.
    pub fn build(self) -> Result<RedpandaMessageBus, MessageBusError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| MessageBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let compression = self.compression.unwrap_or_else(|| "none".to_string());
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .set("compression.type", &compression)
            .create()
            .map_err(|e| MessageBusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE).max(1);
        let auto_offset_reset = self.auto_offset_reset.unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks = %acks,
            compression = %compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaMessageBus created"
        );

        Ok(RedpandaMessageBus {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            buffer_size,
            auto_offset_reset,
        })
    }
}

impl MessageBus for RedpandaMessageBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), MessageBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();

        Box::pin(async move {
            let record = FutureRecord::to(&topic)
                .key(envelope.key.as_bytes())
                .payload(&envelope.payload);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %envelope.key,
                        partition,
                        offset,
                        "Envelope published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        key = %envelope.key,
                        error = %kafka_error,
                        "Failed to publish envelope"
                    );
                    Err(MessageBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EnvelopeStream, MessageBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let group_id = self.group_for(&topics);
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let subscription_failed = |reason: String| MessageBusError::SubscriptionFailed {
                topics: topics.clone(),
                reason,
            };

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| subscription_failed(format!("Failed to create consumer: {e}")))?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| subscription_failed(format!("Failed to subscribe to topics: {e}")))?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %group_id,
                buffer_size,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to topics"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);
            tokio::spawn(forward(consumer, tx));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EnvelopeStream)
        })
    }
}

/// Own `consumer` and forward its messages into `tx` until the receiver is
/// dropped. Offsets are committed only after a successful send.
async fn forward(
    consumer: StreamConsumer,
    tx: tokio::sync::mpsc::Sender<Result<Envelope, MessageBusError>>,
) {
    use futures::StreamExt;

    let mut stream = consumer.stream();
    while let Some(next) = stream.next().await {
        match next {
            Ok(message) => {
                let result = to_envelope(&message);
                if let Ok(envelope) = &result {
                    tracing::trace!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        key = %envelope.key,
                        "Received envelope"
                    );
                }

                if tx.send(result).await.is_err() {
                    tracing::debug!("Subscriber dropped, leaving offset uncommitted");
                    break;
                }

                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    tracing::warn!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Failed to commit offset (message may be redelivered)"
                    );
                }
            },
            Err(e) => {
                let err = MessageBusError::TransportError(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
            },
        }
    }

    tracing::debug!("Consumer task exiting");
}

fn to_envelope(message: &BorrowedMessage<'_>) -> Result<Envelope, MessageBusError> {
    envelope_from_parts(message.key(), message.payload())
}

/// Build an envelope from raw record parts.
///
/// A record without a payload is a codec error. A missing key becomes an
/// empty key; the payload still names the order.
fn envelope_from_parts(key: Option<&[u8]>, payload: Option<&[u8]>) -> Result<Envelope, MessageBusError> {
    let key = key.map(String::from_utf8_lossy).unwrap_or_default();
    let payload = payload.ok_or_else(|| MessageBusError::Codec(format!("Message '{key}' has no payload")))?;
    Ok(Envelope::new(key, payload.to_vec()))
}

/// Explicit group, or one derived from the sorted topic names.
fn consumer_group_id(explicit: Option<&str>, topics: &[String]) -> String {
    if let Some(group) = explicit {
        return group.to_string();
    }
    let mut sorted = topics.to_vec();
    sorted.sort();
    format!("delivery-{}", sorted.join("-"))
}
