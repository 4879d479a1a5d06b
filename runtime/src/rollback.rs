//! Rollback pipeline writer.
//!
//! Moves existing records back to the status carried by each rollback
//! message. Unlike [`BatchWriter`](crate::batch_writer::BatchWriter) an
//! exhausted batch is only logged; nothing is republished.
//!
//! A pass retries the whole batch. Messages whose record already carries the
//! target status are counted as applied without another update, so repeated
//! passes leave versions alone. A missing record or a lost version race is
//! worth another pass; a store constraint violation ends the batch at once.

use crate::ingestor::{BatchOutcome, BatchSink};
use crate::metrics::PipelineMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use delivery_core::error::DeliveryError;
use delivery_core::event::OrderEvent;
use delivery_core::ids::MerchantOrderId;
use delivery_core::state_store::StateStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Applies rollback messages with bounded whole-batch retry.
pub struct RollbackWriter {
    store: Arc<dyn StateStore>,
    policy: RetryPolicy,
}

impl RollbackWriter {
    /// Create a rollback writer.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Apply every message in `batch`, logging the batch on exhaustion.
    pub async fn apply_batch(&self, batch: Vec<OrderEvent>) -> BatchOutcome {
        let mut attempts = 0;

        let result = retry_with_predicate(
            &self.policy,
            |attempt| {
                attempts = attempt + 1;
                let batch = &batch;
                async move {
                    if attempt > 0 {
                        PipelineMetrics::record_rollback_retry();
                    }
                    self.apply_once(batch).await
                }
            },
            DeliveryError::is_retryable,
        )
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(batch_size = batch.len(), attempts, "Rollback batch applied");
                PipelineMetrics::record_rollback_applied(batch.len());
                BatchOutcome::Persisted { attempts }
            },
            Err(e) => {
                let ids: Vec<&str> = batch.iter().map(|event| event.merchant_order_id.as_str()).collect();
                tracing::error!(
                    batch_size = batch.len(),
                    attempts,
                    merchant_order_ids = ?ids,
                    error = %e,
                    "Rollback batch abandoned, manual remediation required"
                );
                PipelineMetrics::record_rollback_exhausted();
                BatchOutcome::Exhausted { attempts }
            },
        }
    }

    /// One pass over the batch. Every message is attempted; the pass fails if
    /// any of them is not in its target status afterwards.
    ///
    /// A failed pass is a retryable `PersistenceFailure` unless some message
    /// hit a failure another pass cannot cure, which is returned as is.
    async fn apply_once(&self, batch: &[OrderEvent]) -> Result<(), DeliveryError> {
        let mut failed: Vec<MerchantOrderId> = Vec::new();
        let mut permanent = None;

        for event in batch {
            if let Err(e) = self.apply_one(event).await {
                tracing::warn!(
                    merchant_order_id = %event.merchant_order_id,
                    error = %e,
                    "Rollback message not applied"
                );
                failed.push(event.merchant_order_id.clone());
                if permanent.is_none() && !cured_by_another_pass(&e) {
                    permanent = Some(e);
                }
            }
        }

        if let Some(e) = permanent {
            return Err(e);
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(DeliveryError::PersistenceFailure(format!(
                "{} of {} rollback messages failed",
                failed.len(),
                batch.len()
            )))
        }
    }

    async fn apply_one(&self, event: &OrderEvent) -> Result<(), DeliveryError> {
        let current = self
            .store
            .find(&event.merchant_order_id)
            .await?
            .ok_or_else(|| DeliveryError::NotFound {
                merchant_order_id: event.merchant_order_id.clone(),
                expected: event.status,
            })?;

        if current.status == event.status {
            return Ok(());
        }

        let rolled_back = current.with_status(event.status);
        match self.store.update_conditional(&rolled_back).await? {
            1 => Ok(()),
            _ => Err(DeliveryError::Conflict {
                merchant_order_id: event.merchant_order_id.clone(),
            }),
        }
    }
}

/// Missing records may still arrive and lost races can be re-read.
const fn cured_by_another_pass(error: &DeliveryError) -> bool {
    error.is_retryable() || matches!(error, DeliveryError::NotFound { .. } | DeliveryError::Conflict { .. })
}

impl BatchSink<OrderEvent> for RollbackWriter {
    fn write(&self, batch: Vec<OrderEvent>) -> Pin<Box<dyn Future<Output = BatchOutcome> + Send + '_>> {
        Box::pin(self.apply_batch(batch))
    }
}
