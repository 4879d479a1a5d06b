//! End-to-end tests of the ingest, transition and rollback paths over the
//! in-memory collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use delivery_core::command::{CompleteDelivery, StartDelivery};
use delivery_core::delivery::RiderIdentity;
use delivery_core::envelope::Envelope;
use delivery_core::ids::{MerchantOrderId, Version};
use delivery_core::message_bus::MessageBus;
use delivery_core::status::OrderStatus;
use delivery_core::topics;
use delivery_runtime::{
    BatchConfig, BatchIngestor, BatchOutcome, BatchWriter, DeliveryQueries, IngestConsumer, RetryPolicy,
    RollbackWriter, TransitionConfig, TransitionCoordinator,
};
use delivery_testing::{InMemoryLockService, InMemoryMessageBus, InMemoryStateStore, fixtures, strategies};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("delivery_runtime=debug")
        .with_test_writer()
        .try_init();
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn ingestor(store: &InMemoryStateStore, bus: &InMemoryMessageBus) -> Arc<BatchIngestor<delivery_core::OrderEvent>> {
    let writer = BatchWriter::new(Arc::new(store.clone()), Arc::new(bus.clone()), RetryPolicy::default());
    BatchIngestor::new("ingest", BatchConfig::default(), Arc::new(writer))
}

#[tokio::test(start_paused = true)]
async fn five_events_flush_once_without_timer() {
    init_tracing();
    let store = InMemoryStateStore::new();
    let bus = InMemoryMessageBus::new();
    let ingestor = ingestor(&store, &bus);

    let mut handles = Vec::new();
    for id in ["M1", "M2", "M3", "M4", "M5"] {
        handles.extend(ingestor.ingest(fixtures::cooking_event(id)));
    }

    assert_eq!(handles.len(), 1);
    let outcome = handles.pop().unwrap().await.unwrap();
    assert_eq!(outcome, BatchOutcome::Persisted { attempts: 1 });
    assert_eq!(store.insert_attempts(), 1);
    assert_eq!(store.len(), 5);

    // no timer left behind to write again
    tokio::time::sleep(Duration::from_secs(11)).await;
    settle().await;
    assert_eq!(store.insert_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn three_events_flush_after_idle_interval() {
    init_tracing();
    let store = InMemoryStateStore::new();
    let bus = InMemoryMessageBus::new();
    let ingestor = ingestor(&store, &bus);

    for id in ["M1", "M2", "M3"] {
        assert!(ingestor.ingest(fixtures::cooking_event(id)).is_none());
    }

    tokio::time::sleep(Duration::from_millis(9_900)).await;
    settle().await;
    assert_eq!(store.insert_attempts(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;
    assert_eq!(store.insert_attempts(), 1);
    assert_eq!(store.len(), 3);
    assert_eq!(ingestor.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_batch_commits_nothing_and_compensates_everything() {
    init_tracing();
    let store = InMemoryStateStore::new();
    let bus = InMemoryMessageBus::new();
    store.fail_next_inserts(4);
    let ingestor = ingestor(&store, &bus);

    ingestor.ingest(fixtures::cooking_event("M1"));
    ingestor.ingest(fixtures::cooking_event("M2"));
    let outcome = ingestor.drain().await.unwrap();

    assert_eq!(
        outcome,
        BatchOutcome::Compensated {
            attempts: 4,
            republished: 2
        }
    );
    assert!(store.is_empty());
    let republished = bus.events_on(topics::STATUS_CHANGE);
    assert_eq!(republished.len(), 2);
    assert!(republished.iter().all(|e| e.status == OrderStatus::OrderConfirmed));
}

#[tokio::test(start_paused = true)]
async fn order_lifecycle_through_bus_and_coordinator() {
    init_tracing();
    let store = InMemoryStateStore::new();
    let bus = InMemoryMessageBus::new();
    let locks = InMemoryLockService::new();
    let (shutdown, _) = broadcast::channel(1);

    let ingest = ingestor(&store, &bus);
    let rollback = BatchIngestor::new(
        "rollback",
        BatchConfig::default(),
        Arc::new(RollbackWriter::new(Arc::new(store.clone()), RetryPolicy::default())),
    );

    let ingest_task = IngestConsumer::new(
        "ingest",
        vec![topics::ORDER_COOKING.to_string()],
        Arc::new(bus.clone()),
        Arc::clone(&ingest),
        shutdown.subscribe(),
    )
    .spawn();
    let rollback_task = IngestConsumer::new(
        "rollback",
        vec![topics::ORDER_ROLLBACK.to_string()],
        Arc::new(bus.clone()),
        Arc::clone(&rollback),
        shutdown.subscribe(),
    )
    .spawn();
    settle().await;

    for id in ["M1", "M2"] {
        let envelope = Envelope::try_from(&fixtures::cooking_event(id)).unwrap();
        bus.publish(topics::ORDER_COOKING, &envelope).await.unwrap();
    }
    settle().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;

    let queries = DeliveryQueries::new(Arc::new(store.clone()));
    assert_eq!(queries.cooking_orders().await.unwrap().len(), 2);

    let coordinator = TransitionCoordinator::new(
        Arc::new(store.clone()),
        Arc::new(locks.clone()),
        Arc::new(bus.clone()),
        TransitionConfig::default(),
    );

    let started = coordinator
        .start_delivery(StartDelivery {
            merchant_order_id: MerchantOrderId::new("M1"),
            rider_identity: RiderIdentity::Social(42),
            accepted_at: fixtures::at(12, 30),
        })
        .await
        .unwrap();
    assert_eq!(started.version, Version::new(1));
    assert_eq!(queries.delivering_orders("social", 42).await.unwrap().len(), 1);
    assert!(queries.delivering_orders("user", 42).await.unwrap().is_empty());

    let delivered = coordinator
        .complete_delivery(CompleteDelivery {
            merchant_order_id: MerchantOrderId::new("M1"),
            delivered_at: fixtures::at(13, 0),
        })
        .await
        .unwrap();
    assert_eq!(delivered.status, OrderStatus::OrderDelivered);
    assert_eq!(delivered.version, Version::new(2));

    // M2 is rolled back by an upstream service
    let envelope = Envelope::try_from(&fixtures::rollback_event("M2")).unwrap();
    bus.publish(topics::ORDER_ROLLBACK, &envelope).await.unwrap();
    settle().await;

    shutdown.send(()).unwrap();
    assert_eq!(ingest_task.await.unwrap(), None);
    assert_eq!(rollback_task.await.unwrap(), Some(BatchOutcome::Persisted { attempts: 1 }));

    let m2 = store.get("M2").unwrap();
    assert_eq!(m2.status, OrderStatus::OrderConfirmed);
    assert_eq!(m2.version, Version::new(1));

    let statuses: Vec<OrderStatus> = bus.events_on(topics::STATUS_CHANGE).iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![OrderStatus::OrderDelivering, OrderStatus::OrderDelivered]);
}

proptest! {
    #[test]
    fn ingested_events_are_all_persisted(events in strategies::distinct_cooking_events(23)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        let (persisted, expected) = runtime.block_on(async {
            let store = InMemoryStateStore::new();
            let bus = InMemoryMessageBus::new();
            let ingestor = ingestor(&store, &bus);

            let mut handles = Vec::new();
            for event in events.iter().cloned() {
                handles.extend(ingestor.ingest(event));
            }
            for handle in handles {
                handle.await.unwrap();
            }
            ingestor.drain().await;

            (store.len(), events.len())
        });

        prop_assert_eq!(persisted, expected);
    }
}
