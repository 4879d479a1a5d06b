//! Rider-driven state transitions.
//!
//! `start_delivery` takes a per-order lock, then a version-checked update.
//! `complete_delivery` relies on the version check alone. Both publish the
//! resulting record to the status topic after commit; a publish failure is
//! reported but the commit stands.

use crate::metrics::TransitionMetrics;
use delivery_core::command::{CompleteDelivery, StartDelivery};
use delivery_core::delivery::DeliveryRecord;
use delivery_core::envelope::Envelope;
use delivery_core::error::DeliveryError;
use delivery_core::event::OrderEvent;
use delivery_core::ids::MerchantOrderId;
use delivery_core::lock::{LockGuard, LockService, start_delivery_key};
use delivery_core::message_bus::MessageBus;
use delivery_core::state_store::StateStore;
use delivery_core::status::OrderStatus;
use delivery_core::topics;
use std::sync::Arc;
use std::time::Duration;

const START: &str = "start_delivery";
const COMPLETE: &str = "complete_delivery";

/// Lock and publish settings for transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionConfig {
    /// How long `start_delivery` waits for the order lock.
    pub lock_wait: Duration,
    /// How long an unreleased lock survives.
    pub lock_ttl: Duration,
    /// Topic receiving the updated record.
    pub status_topic: String,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(3),
            lock_ttl: Duration::from_secs(10),
            status_topic: topics::STATUS_CHANGE.to_string(),
        }
    }
}

/// Serves start/complete transitions.
///
/// # Example
///
/// ```ignore
/// let coordinator = TransitionCoordinator::new(store, locks, bus, TransitionConfig::default());
/// let record = coordinator
///     .start_delivery(StartDelivery {
///         merchant_order_id: MerchantOrderId::new("M1"),
///         rider_identity: RiderIdentity::User(7),
///         accepted_at,
///     })
///     .await?;
/// assert_eq!(record.status, OrderStatus::OrderDelivering);
/// ```
#[derive(Clone)]
pub struct TransitionCoordinator {
    store: Arc<dyn StateStore>,
    locks: Arc<dyn LockService>,
    bus: Arc<dyn MessageBus>,
    config: TransitionConfig,
}

impl TransitionCoordinator {
    /// Create a coordinator over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        locks: Arc<dyn LockService>,
        bus: Arc<dyn MessageBus>,
        config: TransitionConfig,
    ) -> Self {
        Self {
            store,
            locks,
            bus,
            config,
        }
    }

    /// Current configuration.
    #[must_use]
    pub const fn config(&self) -> &TransitionConfig {
        &self.config
    }

    /// Move a cooked order to `ORDER_DELIVERING` under the order lock.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::ValidationFailure`] for a blank order id
    /// - [`DeliveryError::LockTimeout`] if the lock was not taken in time
    /// - [`DeliveryError::NotFound`] / [`DeliveryError::Conflict`] if the
    ///   order is not cooking
    /// - [`DeliveryError::PublishFailure`] if the commit could not be announced
    #[tracing::instrument(skip(self, command), fields(merchant_order_id = %command.merchant_order_id))]
    pub async fn start_delivery(&self, command: StartDelivery) -> Result<DeliveryRecord, DeliveryError> {
        validate(&command.merchant_order_id)?;
        TransitionMetrics::record_started(START);

        let key = start_delivery_key(&command.merchant_order_id);
        let Some(guard) =
            LockGuard::acquire(Arc::clone(&self.locks), &key, self.config.lock_wait, self.config.lock_ttl).await?
        else {
            tracing::info!("Order is already being processed");
            TransitionMetrics::record_lock_timeout();
            return Err(DeliveryError::LockTimeout {
                merchant_order_id: command.merchant_order_id,
            });
        };

        let rider = command.rider_identity;
        let accepted_at = command.accepted_at;
        let result = self
            .transition(START, &command.merchant_order_id, OrderStatus::OrderCooking, |record| {
                record.picked_up(rider, accepted_at)
            })
            .await;

        if let Err(e) = guard.release().await {
            tracing::warn!(error = %e, "Failed to release start lock, TTL will expire it");
        }
        result
    }

    /// Move a delivering order to `ORDER_DELIVERED`.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::ValidationFailure`] for a blank order id
    /// - [`DeliveryError::NotFound`] / [`DeliveryError::Conflict`] if the
    ///   order is not delivering
    /// - [`DeliveryError::PublishFailure`] if the commit could not be announced
    #[tracing::instrument(skip(self, command), fields(merchant_order_id = %command.merchant_order_id))]
    pub async fn complete_delivery(&self, command: CompleteDelivery) -> Result<DeliveryRecord, DeliveryError> {
        validate(&command.merchant_order_id)?;
        TransitionMetrics::record_started(COMPLETE);

        let delivered_at = command.delivered_at;
        self.transition(COMPLETE, &command.merchant_order_id, OrderStatus::OrderDelivering, |record| {
            record.handed_over(delivered_at)
        })
        .await
    }

    /// Read in `expected`, apply `change`, write back by id and version, publish.
    async fn transition<F>(
        &self,
        operation: &'static str,
        merchant_order_id: &MerchantOrderId,
        expected: OrderStatus,
        change: F,
    ) -> Result<DeliveryRecord, DeliveryError>
    where
        F: FnOnce(&DeliveryRecord) -> DeliveryRecord + Send,
    {
        let Some(current) = self.store.find_in_status(merchant_order_id, expected).await? else {
            return Err(self.classify_miss(operation, merchant_order_id, expected).await);
        };

        let updated = change(&current);
        let rows = self.store.update_conditional(&updated).await?;
        if rows == 0 {
            tracing::info!(version = %current.version, "Record changed since it was read");
            TransitionMetrics::record_conflict(operation);
            return Err(DeliveryError::Conflict {
                merchant_order_id: merchant_order_id.clone(),
            });
        }

        let stored = updated.with_version(current.version.next());
        tracing::debug!(status = %stored.status, version = %stored.version, "Transition committed");

        self.publish(&stored).await?;
        TransitionMetrics::record_completed(operation);
        Ok(stored)
    }

    /// A lookup miss is a conflict when someone already moved the record
    /// past `expected`, and not-found otherwise.
    async fn classify_miss(
        &self,
        operation: &'static str,
        merchant_order_id: &MerchantOrderId,
        expected: OrderStatus,
    ) -> DeliveryError {
        match self.store.find(merchant_order_id).await {
            Ok(Some(record)) if record.status.is_after(expected) => {
                tracing::info!(status = %record.status, "Record already advanced");
                TransitionMetrics::record_conflict(operation);
                DeliveryError::Conflict {
                    merchant_order_id: merchant_order_id.clone(),
                }
            },
            Ok(_) => DeliveryError::NotFound {
                merchant_order_id: merchant_order_id.clone(),
                expected,
            },
            Err(e) => e.into(),
        }
    }

    async fn publish(&self, record: &DeliveryRecord) -> Result<(), DeliveryError> {
        let event = OrderEvent::from(record);
        let envelope = Envelope::try_from(&event).map_err(|e| DeliveryError::PublishFailure(e.to_string()))?;

        self.bus
            .publish(&self.config.status_topic, &envelope)
            .await
            .map_err(|e| {
                tracing::error!(topic = %self.config.status_topic, error = %e, "Committed transition was not published");
                DeliveryError::PublishFailure(e.to_string())
            })
    }
}

fn validate(merchant_order_id: &MerchantOrderId) -> Result<(), DeliveryError> {
    if merchant_order_id.is_blank() {
        return Err(DeliveryError::ValidationFailure(
            "merchantOrderId must not be blank".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use delivery_core::delivery::RiderIdentity;
    use delivery_core::ids::Version;
    use delivery_core::lock::LockService as _;
    use delivery_testing::{InMemoryLockService, InMemoryMessageBus, InMemoryStateStore, fixtures};

    struct Harness {
        store: InMemoryStateStore,
        locks: InMemoryLockService,
        bus: InMemoryMessageBus,
        coordinator: TransitionCoordinator,
    }

    fn harness() -> Harness {
        let store = InMemoryStateStore::new();
        let locks = InMemoryLockService::new();
        let bus = InMemoryMessageBus::new();
        let coordinator = TransitionCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(locks.clone()),
            Arc::new(bus.clone()),
            TransitionConfig::default(),
        );
        Harness {
            store,
            locks,
            bus,
            coordinator,
        }
    }

    fn start(id: &str) -> StartDelivery {
        StartDelivery {
            merchant_order_id: MerchantOrderId::new(id),
            rider_identity: RiderIdentity::User(7),
            accepted_at: fixtures::at(12, 30),
        }
    }

    fn complete(id: &str) -> CompleteDelivery {
        CompleteDelivery {
            merchant_order_id: MerchantOrderId::new(id),
            delivered_at: fixtures::at(13, 0),
        }
    }

    #[tokio::test]
    async fn start_moves_cooking_to_delivering_and_bumps_version() {
        let h = harness();
        h.store.seed(fixtures::cooking_record("M1", 1, 2));

        let record = h.coordinator.start_delivery(start("M1")).await.unwrap();

        assert_eq!(record.status, OrderStatus::OrderDelivering);
        assert_eq!(record.version, Version::new(3));
        assert_eq!(record.rider, Some(RiderIdentity::User(7)));
        assert_eq!(record.accepted_at, Some(fixtures::at(12, 30)));
        assert_eq!(h.store.get("M1").unwrap(), record);

        let published = h.bus.events_on(topics::STATUS_CHANGE);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].status, OrderStatus::OrderDelivering);
        assert_eq!(published[0].rider_user_uid, Some(7));

        assert!(!h.locks.is_held("lock:delivery:start:M1"));
        assert_eq!(h.locks.release_count(), 1);
    }

    #[tokio::test]
    async fn start_on_missing_order_is_not_found() {
        let h = harness();

        let err = h.coordinator.start_delivery(start("M1")).await.unwrap_err();

        assert!(matches!(err, DeliveryError::NotFound { expected: OrderStatus::OrderCooking, .. }));
        assert!(h.bus.published().is_empty());
        assert!(!h.locks.is_held("lock:delivery:start:M1"));
    }

    #[tokio::test]
    async fn start_on_already_delivering_order_is_conflict() {
        let h = harness();
        h.store.seed(fixtures::delivering_record("M1", 1, RiderIdentity::Social(3)));

        let err = h.coordinator.start_delivery(start("M1")).await.unwrap_err();

        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(h.store.get("M1").unwrap().rider, Some(RiderIdentity::Social(3)));
    }

    #[tokio::test]
    async fn stale_version_is_conflict_without_retry() {
        let h = harness();
        h.store.seed(fixtures::cooking_record("M1", 1, 0));
        h.store.stale_next_updates(1);

        let err = h.coordinator.start_delivery(start("M1")).await.unwrap_err();

        assert!(matches!(err, DeliveryError::Conflict { .. }));
        assert_eq!(h.store.update_attempts(), 1);
        assert_eq!(h.store.get("M1").unwrap().status, OrderStatus::OrderCooking);
        assert!(h.bus.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn held_lock_times_out_without_mutation() {
        let h = harness();
        h.store.seed(fixtures::cooking_record("M1", 1, 0));
        let _held = h
            .locks
            .try_acquire("lock:delivery:start:M1", Duration::ZERO, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let err = h.coordinator.start_delivery(start("M1")).await.unwrap_err();

        assert!(matches!(err, DeliveryError::LockTimeout { .. }));
        assert_eq!(h.store.update_attempts(), 0);
    }

    #[tokio::test]
    async fn lock_backend_failure_is_persistence_failure() {
        let h = harness();
        h.store.seed(fixtures::cooking_record("M1", 1, 0));
        h.locks.set_unavailable(true);

        let err = h.coordinator.start_delivery(start("M1")).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(h.store.update_attempts(), 0);
    }

    #[tokio::test]
    async fn publish_failure_keeps_the_commit() {
        let h = harness();
        h.store.seed(fixtures::cooking_record("M1", 1, 0));
        h.bus.fail_next_publishes(1);

        let err = h.coordinator.start_delivery(start("M1")).await.unwrap_err();

        assert!(matches!(err, DeliveryError::PublishFailure(_)));
        let stored = h.store.get("M1").unwrap();
        assert_eq!(stored.status, OrderStatus::OrderDelivering);
        assert_eq!(stored.version, Version::new(1));
        assert!(!h.locks.is_held("lock:delivery:start:M1"));
    }

    #[tokio::test]
    async fn blank_id_is_rejected_before_io() {
        let h = harness();

        let err = h.coordinator.start_delivery(start("  ")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::ValidationFailure(_)));

        let err = h.coordinator.complete_delivery(complete("")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::ValidationFailure(_)));

        assert_eq!(h.locks.release_count(), 0);
    }

    #[tokio::test]
    async fn complete_moves_delivering_to_delivered() {
        let h = harness();
        h.store.seed(fixtures::delivering_record("M1", 1, RiderIdentity::User(7)));

        let record = h.coordinator.complete_delivery(complete("M1")).await.unwrap();

        assert_eq!(record.status, OrderStatus::OrderDelivered);
        assert_eq!(record.version, Version::new(2));
        assert_eq!(record.delivered_at, Some(fixtures::at(13, 0)));
        assert_eq!(h.bus.events_on(topics::STATUS_CHANGE)[0].status, OrderStatus::OrderDelivered);
        assert_eq!(h.locks.release_count(), 0);
    }

    #[tokio::test]
    async fn complete_on_cooking_order_fails_without_mutation() {
        let h = harness();
        let seeded = fixtures::cooking_record("M1", 1, 5);
        h.store.seed(seeded.clone());

        let err = h.coordinator.complete_delivery(complete("M1")).await.unwrap_err();

        assert!(matches!(err, DeliveryError::NotFound { expected: OrderStatus::OrderDelivering, .. }));
        assert_eq!(h.store.get("M1").unwrap(), seeded);
        assert_eq!(h.store.update_attempts(), 0);
    }

    #[tokio::test]
    async fn complete_twice_is_conflict() {
        let h = harness();
        h.store.seed(fixtures::delivering_record("M1", 1, RiderIdentity::User(7)));

        h.coordinator.complete_delivery(complete("M1")).await.unwrap();
        let err = h.coordinator.complete_delivery(complete("M1")).await.unwrap_err();

        assert!(matches!(err, DeliveryError::Conflict { .. }));
        assert_eq!(h.store.get("M1").unwrap().version, Version::new(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_transition_once() {
        let h = harness();
        h.store.seed(fixtures::cooking_record("M1", 1, 0));

        let handles: Vec<_> = (0..8)
            .map(|rider| {
                let coordinator = h.coordinator.clone();
                tokio::spawn(async move {
                    coordinator
                        .start_delivery(StartDelivery {
                            rider_identity: RiderIdentity::User(rider),
                            ..start("M1")
                        })
                        .await
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(DeliveryError::Conflict { .. } | DeliveryError::LockTimeout { .. }) => {},
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(h.store.get("M1").unwrap().version, Version::new(1));
        assert_eq!(h.bus.events_on(topics::STATUS_CHANGE).len(), 1);
    }
}
