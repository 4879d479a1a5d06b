//! Batch persistence of ingested order events.
//!
//! A batch is all-or-compensated: the whole batch is inserted in one store
//! transaction and retried as a unit. If every attempt fails, each event is
//! stamped `ORDER_CONFIRMED` and republished so upstream services can roll
//! the order back. A batch that can never be stored (a malformed event or a
//! constraint violation) is compensated after its first attempt. Nothing is
//! raised to the caller.

use crate::ingestor::{BatchOutcome, BatchSink};
use crate::metrics::PipelineMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use delivery_core::delivery::NewDelivery;
use delivery_core::envelope::Envelope;
use delivery_core::error::DeliveryError;
use delivery_core::event::OrderEvent;
use delivery_core::message_bus::MessageBus;
use delivery_core::state_store::StateStore;
use delivery_core::status::OrderStatus;
use delivery_core::topics;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Persists batches of [`OrderEvent`]s with bounded retry and compensation.
pub struct BatchWriter {
    store: Arc<dyn StateStore>,
    bus: Arc<dyn MessageBus>,
    policy: RetryPolicy,
    compensation_topic: String,
}

impl BatchWriter {
    /// Create a writer that compensates to `status-change`.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, bus: Arc<dyn MessageBus>, policy: RetryPolicy) -> Self {
        Self {
            store,
            bus,
            policy,
            compensation_topic: topics::STATUS_CHANGE.to_string(),
        }
    }

    /// Publish compensation messages to another topic.
    #[must_use]
    pub fn with_compensation_topic(mut self, topic: impl Into<String>) -> Self {
        self.compensation_topic = topic.into();
        self
    }

    /// Persist `batch`, compensating on exhaustion.
    pub async fn write_batch(&self, batch: Vec<OrderEvent>) -> BatchOutcome {
        let size = batch.len();
        let mut attempts = 0;

        let result = retry_with_predicate(
            &self.policy,
            |attempt| {
                attempts = attempt + 1;
                let batch = &batch;
                async move {
                    if attempt > 0 {
                        PipelineMetrics::record_retry();
                    }
                    self.insert_once(batch).await
                }
            },
            DeliveryError::is_retryable,
        )
        .await;

        match result {
            Ok(persisted) => {
                tracing::debug!(batch_size = size, attempts, "Batch persisted");
                PipelineMetrics::record_persisted(persisted);
                BatchOutcome::Persisted { attempts }
            },
            Err(e) => {
                tracing::error!(
                    batch_size = size,
                    attempts,
                    error = %e,
                    "Batch could not be persisted, publishing compensation"
                );
                let republished = self.compensate(batch).await;
                PipelineMetrics::record_compensated(republished);
                BatchOutcome::Compensated {
                    attempts,
                    republished,
                }
            },
        }
    }

    async fn insert_once(&self, batch: &[OrderEvent]) -> Result<usize, DeliveryError> {
        let records = batch
            .iter()
            .cloned()
            .map(NewDelivery::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let persisted = self.store.insert_all(records).await?;
        if persisted == batch.len() {
            Ok(persisted)
        } else {
            Err(DeliveryError::PersistenceFailure(format!(
                "persisted {persisted} of {} records",
                batch.len()
            )))
        }
    }

    /// Republish every event with the compensation status. A failed publish
    /// is logged and does not stop the rest.
    async fn compensate(&self, batch: Vec<OrderEvent>) -> usize {
        let mut republished = 0;
        for event in batch {
            let event = event.with_status(OrderStatus::COMPENSATION);
            let result = match Envelope::try_from(&event) {
                Ok(envelope) => self
                    .bus
                    .publish(&self.compensation_topic, &envelope)
                    .await
                    .map_err(DeliveryError::from),
                Err(e) => Err(DeliveryError::from(e)),
            };

            match result {
                Ok(()) => republished += 1,
                Err(e) => tracing::error!(
                    merchant_order_id = %event.merchant_order_id,
                    topic = %self.compensation_topic,
                    error = %e,
                    "Failed to publish compensation message"
                ),
            }
        }
        republished
    }
}

impl BatchSink<OrderEvent> for BatchWriter {
    fn write(&self, batch: Vec<OrderEvent>) -> Pin<Box<dyn Future<Output = BatchOutcome> + Send + '_>> {
        Box::pin(self.write_batch(batch))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use delivery_core::ids::Version;
    use delivery_testing::{InMemoryMessageBus, InMemoryStateStore, fixtures};

    fn writer(store: &InMemoryStateStore, bus: &InMemoryMessageBus) -> BatchWriter {
        BatchWriter::new(Arc::new(store.clone()), Arc::new(bus.clone()), RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn persists_whole_batch_without_compensation() {
        let store = InMemoryStateStore::new();
        let bus = InMemoryMessageBus::new();

        let outcome = writer(&store, &bus)
            .write_batch(vec![fixtures::cooking_event("M1"), fixtures::cooking_event("M2")])
            .await;

        assert_eq!(outcome, BatchOutcome::Persisted { attempts: 1 });
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("M1").unwrap().version, Version::INITIAL);
        assert!(bus.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let store = InMemoryStateStore::new();
        let bus = InMemoryMessageBus::new();
        store.fail_next_inserts(2);

        let outcome = writer(&store, &bus).write_batch(vec![fixtures::cooking_event("M1")]).await;

        assert_eq!(outcome, BatchOutcome::Persisted { attempts: 3 });
        assert_eq!(store.insert_attempts(), 3);
        assert!(bus.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_batch_is_republished_as_confirmed() {
        let store = InMemoryStateStore::new();
        let bus = InMemoryMessageBus::new();
        store.fail_next_inserts(4);

        let outcome = writer(&store, &bus)
            .write_batch(vec![fixtures::cooking_event("M1"), fixtures::cooking_event("M2")])
            .await;

        assert_eq!(
            outcome,
            BatchOutcome::Compensated {
                attempts: 4,
                republished: 2
            }
        );
        assert_eq!(store.insert_attempts(), 4);
        assert!(store.is_empty());

        let compensation = bus.events_on(topics::STATUS_CHANGE);
        assert_eq!(compensation.len(), 2);
        assert!(compensation.iter().all(|e| e.status == OrderStatus::OrderConfirmed));
        assert_eq!(compensation[0].merchant_order_id.as_str(), "M1");
        assert_eq!(compensation[1].merchant_order_id.as_str(), "M2");
    }

    #[tokio::test(start_paused = true)]
    async fn short_count_counts_as_failure() {
        let store = InMemoryStateStore::new();
        let bus = InMemoryMessageBus::new();
        store.short_next_inserts(1);

        let outcome = writer(&store, &bus)
            .write_batch(vec![fixtures::cooking_event("M1"), fixtures::cooking_event("M2")])
            .await;

        assert_eq!(outcome, BatchOutcome::Persisted { attempts: 2 });
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn redelivered_events_are_idempotent() {
        let store = InMemoryStateStore::new();
        let bus = InMemoryMessageBus::new();
        let writer = writer(&store, &bus);

        writer.write_batch(vec![fixtures::cooking_event("M1")]).await;
        let outcome = writer
            .write_batch(vec![fixtures::cooking_event("M1"), fixtures::cooking_event("M2")])
            .await;

        assert_eq!(outcome, BatchOutcome::Persisted { attempts: 1 });
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn compensation_continues_past_publish_failures() {
        let store = InMemoryStateStore::new();
        let bus = InMemoryMessageBus::new();
        store.fail_next_inserts(4);
        bus.fail_next_publishes(1);

        let outcome = writer(&store, &bus)
            .write_batch(vec![fixtures::cooking_event("M1"), fixtures::cooking_event("M2")])
            .await;

        assert_eq!(
            outcome,
            BatchOutcome::Compensated {
                attempts: 4,
                republished: 1
            }
        );
        assert_eq!(bus.publish_attempts(), 2);
        assert_eq!(bus.events_on(topics::STATUS_CHANGE)[0].merchant_order_id.as_str(), "M2");
    }

    #[tokio::test(start_paused = true)]
    async fn ambiguous_rider_is_compensated_without_retry() {
        let store = InMemoryStateStore::new();
        let bus = InMemoryMessageBus::new();
        let mut event = fixtures::cooking_event("M1");
        event.rider_user_uid = Some(1);
        event.rider_social_uid = Some(2);
        let started = tokio::time::Instant::now();

        let outcome = writer(&store, &bus)
            .write_batch(vec![event, fixtures::cooking_event("M2")])
            .await;

        assert_eq!(
            outcome,
            BatchOutcome::Compensated {
                attempts: 1,
                republished: 2
            }
        );
        assert_eq!(store.insert_attempts(), 0);
        assert!(store.is_empty());
        assert_eq!(started.elapsed(), std::time::Duration::ZERO);
        assert_eq!(bus.events_on(topics::STATUS_CHANGE).len(), 2);
    }
}
