//! The assembled service over in-memory collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum_test::TestServer;
use delivery_core::envelope::Envelope;
use delivery_core::message_bus::MessageBus;
use delivery_core::status::OrderStatus;
use delivery_core::topics;
use delivery_runtime::BatchOutcome;
use delivery_server::{Collaborators, Config, DeliveryApp};
use delivery_testing::{InMemoryLockService, InMemoryMessageBus, InMemoryStateStore, fixtures};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

fn config(pairs: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

fn collaborators(store: &InMemoryStateStore, bus: &InMemoryMessageBus) -> Collaborators {
    Collaborators {
        store: Arc::new(store.clone()),
        locks: Arc::new(InMemoryLockService::new()),
        bus: Arc::new(bus.clone()),
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn publish(bus: &InMemoryMessageBus, topic: &str, event: &delivery_core::OrderEvent) {
    bus.publish(topic, &Envelope::try_from(event).unwrap()).await.unwrap();
}

#[tokio::test]
async fn shutdown_drains_partial_batches() {
    let store = InMemoryStateStore::new();
    let bus = InMemoryMessageBus::new();
    let app = DeliveryApp::assemble(&config(&[]), collaborators(&store, &bus));
    settle().await;

    publish(&bus, topics::ORDER_COOKING, &fixtures::cooking_event("M1")).await;
    publish(&bus, topics::ORDER_COOKING, &fixtures::cooking_event("M2")).await;
    settle().await;
    assert!(store.is_empty(), "below batch size and before the idle timer");

    let outcomes = app.shutdown().await;

    assert_eq!(outcomes, vec![BatchOutcome::Persisted { attempts: 1 }]);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn configured_topics_are_consumed() {
    let store = InMemoryStateStore::new();
    let bus = InMemoryMessageBus::new();
    let config = config(&[
        ("INGEST_TOPICS", "order-created,order-cooking"),
        ("ROLLBACK_TOPIC", "order-rollback-v2"),
        ("BATCH_SIZE", "1"),
    ]);
    let app = DeliveryApp::assemble(&config, collaborators(&store, &bus));
    settle().await;

    publish(&bus, topics::ORDER_CREATED, &fixtures::cooking_event("M1")).await;
    settle().await;
    assert_eq!(store.len(), 1);

    publish(&bus, "order-rollback-v2", &fixtures::rollback_event("M1")).await;
    settle().await;
    assert_eq!(store.get("M1").unwrap().status, OrderStatus::COMPENSATION);

    assert!(app.shutdown().await.is_empty());
}

#[tokio::test]
async fn router_serves_transitions_and_readiness() {
    let store = InMemoryStateStore::new();
    let bus = InMemoryMessageBus::new();
    store.seed(fixtures::cooking_record("M1", 1, 0));
    let app = DeliveryApp::assemble(&config(&[]), collaborators(&store, &bus));
    let server = TestServer::new(app.router()).unwrap();

    let ready: Value = server.get("/ready").await.json();
    let components: Vec<&str> = ready["checks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["component"].as_str().unwrap())
        .collect();
    assert_eq!(components, vec!["ingest", "rollback"]);

    server
        .post("/api/deliveries/start")
        .json(&json!({
            "merchantOrderId": "M1",
            "riderIdentity": { "kind": "social", "id": 4 },
            "acceptedAt": "2025-01-01T12:30:00"
        }))
        .await
        .assert_status_ok();
    assert_eq!(store.get("M1").unwrap().status, OrderStatus::OrderDelivering);
    assert_eq!(bus.published_to(topics::STATUS_CHANGE).len(), 1);

    app.shutdown().await;
}
