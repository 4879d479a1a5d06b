//! # Delivery Runtime
//!
//! The moving parts of the delivery coordinator, wired over the collaborator
//! traits from `delivery-core`.
//!
//! ## Core Components
//!
//! - **`BatchIngestor`**: mutex-guarded buffer flushed on size or idle timer
//! - **`BatchWriter`**: whole-batch persistence with retry and compensation
//! - **`RollbackWriter`**: rollback application with retry, logged on exhaustion
//! - **`TransitionCoordinator`**: start/complete delivery with lock and version check
//! - **`DeliveryQueries`**: cooking and delivering listings
//! - **`IngestConsumer`**: subscribe-process-reconnect loop feeding an ingestor
//!
//! ## Data flow
//!
//! ```text
//! MessageBus ─▶ IngestConsumer ─▶ BatchIngestor ─▶ BatchWriter ─▶ StateStore
//!                                                      │
//!                                                      └─(exhausted)─▶ MessageBus (ORDER_CONFIRMED)
//!
//! request ─▶ TransitionCoordinator ─▶ LockService ─▶ StateStore ─▶ MessageBus
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use delivery_runtime::{BatchConfig, BatchIngestor, BatchWriter, RetryPolicy};
//!
//! let writer = BatchWriter::new(store, bus, RetryPolicy::default());
//! let ingestor = BatchIngestor::new("ingest", BatchConfig::default(), Arc::new(writer));
//! ingestor.ingest(event);
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Size- and time-triggered batching
pub mod ingestor;

/// Batch persistence with compensation
pub mod batch_writer;

/// Rollback pipeline
pub mod rollback;

/// Start/complete delivery transitions
pub mod coordinator;

/// Read-side listings
pub mod queries;

/// Bus consumer feeding an ingestor
pub mod consumer;

/// Prometheus metrics for observability
pub mod metrics;

/// Readiness reporting
pub mod health;

pub use batch_writer::BatchWriter;
pub use consumer::IngestConsumer;
pub use coordinator::{TransitionConfig, TransitionCoordinator};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use ingestor::{BatchConfig, BatchIngestor, BatchOutcome, BatchSink};
pub use queries::DeliveryQueries;
pub use retry::RetryPolicy;
pub use rollback::RollbackWriter;
