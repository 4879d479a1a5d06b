//! Prometheus metrics for the pipelines and the coordinator.
//!
//! Recording goes through the `metrics` facade, so without an installed
//! recorder (unit tests) every call is a no-op.
//!
//! # Example
//!
//! ```rust,no_run
//! use delivery_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
#[derive(Debug, Clone, Copy)]
pub struct MetricsServer {
    addr: SocketAddr,
}

impl MetricsServer {
    /// Create a metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Address the listener binds to.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Install the global recorder and start the HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if a recorder is already installed or
    /// the listener cannot be started.
    pub fn start(&self) -> Result<(), MetricsError> {
        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        register_metrics();
        tracing::info!(addr = %self.addr, "Metrics server started - available at http://{}/metrics", self.addr);
        Ok(())
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Batch pipeline
    describe_counter!("delivery.batch.persisted", "Records persisted by the batch writer");
    describe_counter!("delivery.batch.retries", "Batch write retries");
    describe_counter!(
        "delivery.batch.compensated",
        "Messages republished as compensation after batch exhaustion"
    );

    // Rollback pipeline
    describe_counter!("delivery.rollback.applied", "Rollback messages applied");
    describe_counter!("delivery.rollback.retries", "Rollback batch retries");
    describe_counter!("delivery.rollback.exhausted", "Rollback batches abandoned after retries");

    // Consumers
    describe_counter!("delivery.consumer.received", "Messages received from the bus");
    describe_counter!("delivery.consumer.rejected", "Messages skipped as undecodable or invalid");

    // Transitions
    describe_counter!("delivery.transition.started", "Transition requests received");
    describe_counter!("delivery.transition.completed", "Transitions committed and published");
    describe_counter!("delivery.transition.conflict", "Transitions lost to a concurrent writer");
    describe_counter!("delivery.transition.lock_timeout", "Start requests that could not take the lock");
}

fn as_count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Batch pipeline metrics recorder.
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Record records persisted by one batch.
    pub fn record_persisted(count: usize) {
        counter!("delivery.batch.persisted").increment(as_count(count));
    }

    /// Record a batch retry.
    pub fn record_retry() {
        counter!("delivery.batch.retries").increment(1);
    }

    /// Record compensation messages republished.
    pub fn record_compensated(count: usize) {
        counter!("delivery.batch.compensated").increment(as_count(count));
    }

    /// Record rollback messages applied.
    pub fn record_rollback_applied(count: usize) {
        counter!("delivery.rollback.applied").increment(as_count(count));
    }

    /// Record a rollback batch retry.
    pub fn record_rollback_retry() {
        counter!("delivery.rollback.retries").increment(1);
    }

    /// Record an abandoned rollback batch.
    pub fn record_rollback_exhausted() {
        counter!("delivery.rollback.exhausted").increment(1);
    }

    /// Record a message received by a consumer.
    pub fn record_received(consumer: &str) {
        counter!("delivery.consumer.received", "consumer" => consumer.to_string()).increment(1);
    }

    /// Record a message a consumer skipped.
    pub fn record_rejected(consumer: &str) {
        counter!("delivery.consumer.rejected", "consumer" => consumer.to_string()).increment(1);
    }
}

/// Transition metrics recorder.
pub struct TransitionMetrics;

impl TransitionMetrics {
    /// Record a transition request.
    pub fn record_started(operation: &'static str) {
        counter!("delivery.transition.started", "operation" => operation).increment(1);
    }

    /// Record a committed transition.
    pub fn record_completed(operation: &'static str) {
        counter!("delivery.transition.completed", "operation" => operation).increment(1);
    }

    /// Record a lost race.
    pub fn record_conflict(operation: &'static str) {
        counter!("delivery.transition.conflict", "operation" => operation).increment(1);
    }

    /// Record a lock wait timeout.
    pub fn record_lock_timeout() {
        counter!("delivery.transition.lock_timeout").increment(1);
    }
}
