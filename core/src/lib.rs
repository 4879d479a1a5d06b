//! # Delivery Core
//!
//! Domain types and collaborator traits for the delivery lifecycle
//! coordinator.
//!
//! The coordinator ingests order lifecycle events from a message bus,
//! persists them in batches and mediates rider-driven transitions
//! (`start_delivery`, `complete_delivery`) with a distributed lock plus
//! optimistic concurrency on the record version.
//!
//! ## Core Concepts
//!
//! - **`DeliveryRecord`**: the stored entity, versioned and never mutated in place
//! - **`OrderEvent`**: the wire representation exchanged over the bus
//! - **`StateStore`**: durable storage with version-checked updates
//! - **`LockService`**: keyed mutual exclusion with bounded wait and TTL
//! - **`MessageBus`**: publish/subscribe over durable topics
//! - **`DeliveryError`**: the failure taxonomy every component reports in
//!
//! ## Lifecycle
//!
//! ```text
//! PAYMENT_COMPLETED → ORDER_CONFIRMED → ORDER_COOKING → ORDER_DELIVERING → ORDER_DELIVERED
//!                          ▲                                  │
//!                          └──────────── rollback ────────────┘
//! ```
//!
//! Records are created by the batch writer (version 0), advanced by the
//! transition coordinator and moved backward only by the rollback pipeline.

// Re-export commonly used types
pub use chrono::NaiveDateTime;
pub use serde::{Deserialize, Serialize};

pub mod command;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod event;
pub mod ids;
pub mod lock;
pub mod message_bus;
pub mod state_store;
pub mod status;
pub mod topics;

pub use command::{CompleteDelivery, StartDelivery, TransitionResponse};
pub use delivery::{DeliveryRecord, NewDelivery, RiderIdentity, RiderKind};
pub use envelope::Envelope;
pub use error::DeliveryError;
pub use event::OrderEvent;
pub use ids::{DeliveryId, MerchantOrderId, Version};
pub use status::OrderStatus;
