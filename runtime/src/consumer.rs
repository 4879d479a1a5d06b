//! Message bus consumer feeding a batch ingestor.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     subscribe
//!     for each envelope:
//!         decode as OrderEvent (skip and log on failure)
//!         skip blank order ids and conflicting riders
//!         ingest
//!     stream ended or subscription failed: wait retry_delay, resubscribe
//! }
//! on shutdown: drain the ingestor with a final flush
//! ```

use crate::ingestor::{BatchIngestor, BatchOutcome};
use crate::metrics::PipelineMetrics;
use delivery_core::envelope::Envelope;
use delivery_core::event::OrderEvent;
use delivery_core::message_bus::{EnvelopeStream, MessageBus};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Why processing a stream stopped.
enum StreamEnd {
    Disconnected,
    Shutdown,
}

/// Consumes order events from the bus into a [`BatchIngestor`].
///
/// # Lifecycle
///
/// 1. Created via `new()`
/// 2. Spawned as background task via `spawn()`
/// 3. Runs until the shutdown signal, then drains its ingestor
///
/// # Configuration
///
/// - `name`: consumer name, used in logs and metric labels
/// - `topics`: topics to subscribe to
/// - `retry_delay`: wait before resubscribing (default: 5s)
pub struct IngestConsumer {
    name: String,
    topics: Vec<String>,
    bus: Arc<dyn MessageBus>,
    ingestor: Arc<BatchIngestor<OrderEvent>>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl IngestConsumer {
    /// Create a consumer with the default retry delay.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: Vec<String>,
        bus: Arc<dyn MessageBus>,
        ingestor: Arc<BatchIngestor<OrderEvent>>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics,
            bus,
            ingestor,
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Set custom retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawn the consumer as a background task.
    ///
    /// The handle resolves with the outcome of the final drain, if the
    /// buffer held anything at shutdown.
    #[must_use]
    pub fn spawn(mut self) -> JoinHandle<Option<BatchOutcome>> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&mut self) -> Option<BatchOutcome> {
        info!(consumer = %self.name, topics = ?self.topics, "Consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => break,
                result = self.bus.subscribe(&topics) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(consumer = %self.name, "Subscribed to message bus");
                    if let StreamEnd::Shutdown = self.process_stream(&mut stream).await {
                        break;
                    }
                    warn!(consumer = %self.name, "Stream ended, reconnecting in {:?}", self.retry_delay);
                },
                Err(e) => {
                    error!(
                        consumer = %self.name,
                        error = %e,
                        "Failed to subscribe, retrying in {:?}",
                        self.retry_delay
                    );
                },
            }

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(self.retry_delay) => {},
            }
        }

        info!(consumer = %self.name, pending = self.ingestor.pending(), "Consumer stopping, draining buffer");
        let outcome = self.ingestor.drain().await;
        info!(consumer = %self.name, ?outcome, "Consumer stopped");
        outcome
    }

    async fn process_stream(&mut self, stream: &mut EnvelopeStream) -> StreamEnd {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => return StreamEnd::Shutdown,
                next = stream.next() => match next {
                    Some(Ok(envelope)) => self.handle(&envelope),
                    Some(Err(e)) => {
                        error!(consumer = %self.name, error = %e, "Error receiving from stream");
                    },
                    None => return StreamEnd::Disconnected,
                },
            }
        }
    }

    fn handle(&self, envelope: &Envelope) {
        let event = match envelope.decode::<OrderEvent>() {
            Ok(event) => event,
            Err(e) => {
                warn!(consumer = %self.name, key = %envelope.key, error = %e, "Skipping undecodable message");
                PipelineMetrics::record_rejected(&self.name);
                return;
            },
        };

        if event.merchant_order_id.is_blank() {
            warn!(consumer = %self.name, key = %envelope.key, "Skipping message without an order id");
            PipelineMetrics::record_rejected(&self.name);
            return;
        }

        if let Err(e) = event.rider() {
            warn!(
                consumer = %self.name,
                merchant_order_id = %event.merchant_order_id,
                error = %e,
                "Skipping invalid message"
            );
            PipelineMetrics::record_rejected(&self.name);
            return;
        }

        PipelineMetrics::record_received(&self.name);
        // Flush tasks run detached; their outcome is logged by the sink.
        drop(self.ingestor.ingest(event));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::batch_writer::BatchWriter;
    use crate::ingestor::BatchConfig;
    use crate::retry::RetryPolicy;
    use delivery_core::status::OrderStatus;
    use delivery_core::topics;
    use delivery_testing::{InMemoryMessageBus, InMemoryStateStore, fixtures};

    struct Harness {
        store: InMemoryStateStore,
        bus: InMemoryMessageBus,
        ingestor: Arc<BatchIngestor<OrderEvent>>,
        shutdown: broadcast::Sender<()>,
    }

    fn harness() -> Harness {
        let store = InMemoryStateStore::new();
        let bus = InMemoryMessageBus::new();
        let writer = BatchWriter::new(Arc::new(store.clone()), Arc::new(bus.clone()), RetryPolicy::default());
        let ingestor = BatchIngestor::new("ingest", BatchConfig::default(), Arc::new(writer));
        let (shutdown, _) = broadcast::channel(1);
        Harness {
            store,
            bus,
            ingestor,
            shutdown,
        }
    }

    impl Harness {
        fn spawn(&self) -> JoinHandle<Option<BatchOutcome>> {
            IngestConsumer::new(
                "ingest",
                vec![topics::ORDER_COOKING.to_string()],
                Arc::new(self.bus.clone()),
                Arc::clone(&self.ingestor),
                self.shutdown.subscribe(),
            )
            .with_retry_delay(Duration::from_millis(100))
            .spawn()
        }

        async fn publish(&self, event: &OrderEvent) {
            let envelope = Envelope::try_from(event).unwrap();
            self.bus.publish(topics::ORDER_COOKING, &envelope).await.unwrap();
        }

        async fn publish_raw(&self, payload: &str) {
            let envelope = Envelope::new("raw", payload.as_bytes().to_vec());
            self.bus.publish(topics::ORDER_COOKING, &envelope).await.unwrap();
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_is_persisted() {
        let h = harness();
        let handle = h.spawn();
        settle().await;

        for id in ["M1", "M2", "M3", "M4", "M5"] {
            h.publish(&fixtures::cooking_event(id)).await;
        }
        settle().await;

        assert_eq!(h.store.len(), 5);
        assert_eq!(h.ingestor.pending(), 0);

        h.shutdown.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_ambiguous_and_unkeyed_messages_are_skipped() {
        let h = harness();
        let handle = h.spawn();
        settle().await;

        h.publish_raw("not json").await;
        h.publish_raw(r#"{"merchantUid":"M9"}"#).await;
        let mut ambiguous = fixtures::cooking_event("M8");
        ambiguous.rider_user_uid = Some(1);
        ambiguous.rider_social_uid = Some(2);
        h.publish(&ambiguous).await;
        h.publish(&fixtures::cooking_event("  ")).await;
        h.publish(&fixtures::cooking_event("M1")).await;
        settle().await;

        assert_eq!(h.ingestor.pending(), 1);

        h.shutdown.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), Some(BatchOutcome::Persisted { attempts: 1 }));
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.store.get("M1").unwrap().status, OrderStatus::OrderCooking);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_buffered_events() {
        let h = harness();
        let handle = h.spawn();
        settle().await;

        h.publish(&fixtures::cooking_event("M1")).await;
        h.publish(&fixtures::cooking_event("M2")).await;
        settle().await;
        assert!(h.store.is_empty());

        h.shutdown.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), Some(BatchOutcome::Persisted { attempts: 1 }));
        assert_eq!(h.store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_stream_ends() {
        let h = harness();
        let handle = h.spawn();
        settle().await;
        assert_eq!(h.bus.subscribe_attempts(), 1);

        h.bus.disconnect_subscribers();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.bus.subscribe_attempts(), 2);

        h.publish(&fixtures::cooking_event("M1")).await;
        settle().await;
        assert_eq!(h.ingestor.pending(), 1);

        h.shutdown.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failed_subscription() {
        let h = harness();
        h.bus.fail_next_subscribes(2);
        let handle = h.spawn();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(h.bus.subscribe_attempts(), 3);

        h.shutdown.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), None);
    }
}
