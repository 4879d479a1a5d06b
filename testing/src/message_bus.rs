//! In-memory message bus.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use delivery_core::envelope::Envelope;
use delivery_core::event::OrderEvent;
use delivery_core::message_bus::{EnvelopeStream, MessageBus, MessageBusError};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Inner {
    published: Vec<(String, Envelope)>,
    publish_attempts: usize,
    failing_publishes: usize,
    failing_subscribes: usize,
    subscribe_attempts: usize,
    sender: broadcast::Sender<(String, Envelope)>,
}

/// [`MessageBus`] that records every publish and fans out to subscribers.
///
/// Subscribers only see messages published after they subscribed.
/// [`disconnect_subscribers`](Self::disconnect_subscribers) ends every open
/// stream, which lets tests exercise consumer reconnects.
///
/// # Example
///
/// ```
/// use delivery_testing::{InMemoryMessageBus, fixtures};
/// use delivery_core::envelope::Envelope;
/// use delivery_core::message_bus::MessageBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryMessageBus::new();
/// let event = fixtures::cooking_event("M1");
/// bus.publish("status-change", &Envelope::try_from(&event)?).await?;
///
/// assert_eq!(bus.events_on("status-change"), vec![event]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryMessageBus {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryMessageBus {
    /// Create a bus with nothing published.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                published: Vec::new(),
                publish_attempts: 0,
                failing_publishes: 0,
                failing_subscribes: 0,
                subscribe_attempts: 0,
                sender,
            })),
        }
    }

    /// Every successful publish, in order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Envelope)> {
        self.inner.read().unwrap().published.clone()
    }

    /// Envelopes published to `topic`, in order.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<Envelope> {
        self.inner
            .read()
            .unwrap()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    /// Order events published to `topic`. Envelopes that do not decode are
    /// skipped.
    #[must_use]
    pub fn events_on(&self, topic: &str) -> Vec<OrderEvent> {
        self.published_to(topic)
            .iter()
            .filter_map(|envelope| envelope.decode().ok())
            .collect()
    }

    /// Number of publish calls, failed ones included.
    #[must_use]
    pub fn publish_attempts(&self) -> usize {
        self.inner.read().unwrap().publish_attempts
    }

    /// Number of subscribe calls, failed ones included.
    #[must_use]
    pub fn subscribe_attempts(&self) -> usize {
        self.inner.read().unwrap().subscribe_attempts
    }

    /// Make the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: usize) {
        self.inner.write().unwrap().failing_publishes = n;
    }

    /// Make the next `n` subscribes fail.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.inner.write().unwrap().failing_subscribes = n;
    }

    /// End every open subscription stream.
    pub fn disconnect_subscribers(&self) {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        self.inner.write().unwrap().sender = sender;
    }

    /// Forget everything published so far.
    pub fn clear(&self) {
        self.inner.write().unwrap().published.clear();
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for InMemoryMessageBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), MessageBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();
        Box::pin(async move {
            let mut inner = self.inner.write().unwrap();
            inner.publish_attempts += 1;
            if inner.failing_publishes > 0 {
                inner.failing_publishes -= 1;
                return Err(MessageBusError::PublishFailed {
                    topic,
                    reason: "injected publish failure".to_string(),
                });
            }
            inner.published.push((topic.clone(), envelope.clone()));
            // no subscribers is not an error
            let _ = inner.sender.send((topic, envelope));
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EnvelopeStream, MessageBusError>> + Send + '_>> {
        let topics: HashSet<String> = topics.iter().map(|t| (*t).to_string()).collect();
        Box::pin(async move {
            let mut rx = {
                let mut inner = self.inner.write().unwrap();
                inner.subscribe_attempts += 1;
                if inner.failing_subscribes > 0 {
                    inner.failing_subscribes -= 1;
                    return Err(MessageBusError::SubscriptionFailed {
                        topics: topics.into_iter().collect(),
                        reason: "injected subscribe failure".to_string(),
                    });
                }
                inner.sender.subscribe()
            };

            let stream = async_stream::stream! {
                loop {
                    match rx.recv().await {
                        Ok((topic, envelope)) => {
                            if topics.contains(&topic) {
                                yield Ok(envelope);
                            }
                        },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            yield Err(MessageBusError::TransportError(format!(
                                "subscriber lagged, {skipped} messages skipped"
                            )));
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };

            Ok(Box::pin(stream) as EnvelopeStream)
        })
    }
}
