//! # Delivery Testing
//!
//! Testing utilities for the delivery coordinator.
//!
//! This crate provides:
//! - In-memory implementations of the collaborator traits, with failure injection
//! - Deterministic fixtures (fixed timestamps, sample events and records)
//! - Proptest strategies for domain types
//!
//! ## Example
//!
//! ```ignore
//! use delivery_testing::{InMemoryStateStore, InMemoryLockService, InMemoryMessageBus, fixtures};
//!
//! #[tokio::test]
//! async fn start_moves_cooking_to_delivering() {
//!     let store = InMemoryStateStore::new();
//!     store.seed(fixtures::cooking_record("M1", 1, 2));
//!
//!     let coordinator = TransitionCoordinator::new(
//!         Arc::new(store.clone()),
//!         Arc::new(InMemoryLockService::new()),
//!         Arc::new(InMemoryMessageBus::new()),
//!         TransitionConfig::default(),
//!     );
//!     coordinator.start_delivery(...).await?;
//! }
//! ```

pub mod fixtures;
pub mod lock;
pub mod message_bus;
pub mod state_store;
pub mod strategies;

// Re-export commonly used items
pub use lock::InMemoryLockService;
pub use message_bus::InMemoryMessageBus;
pub use state_store::InMemoryStateStore;
