//! Read-side listings served to riders.

use delivery_core::delivery::{RiderIdentity, RiderKind};
use delivery_core::error::DeliveryError;
use delivery_core::event::OrderEvent;
use delivery_core::state_store::StateStore;
use delivery_core::status::OrderStatus;
use std::sync::Arc;

/// Lists orders by lifecycle stage.
#[derive(Clone)]
pub struct DeliveryQueries {
    store: Arc<dyn StateStore>,
}

impl DeliveryQueries {
    /// Create queries over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Every order waiting for a rider.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::PersistenceFailure`] if the store fails.
    pub async fn cooking_orders(&self) -> Result<Vec<OrderEvent>, DeliveryError> {
        let records = self.store.list_by_status(OrderStatus::OrderCooking).await?;
        Ok(records.into_iter().map(OrderEvent::from).collect())
    }

    /// Orders a rider is currently carrying.
    ///
    /// `kind` is `user` or `social`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::ValidationFailure`] for an unknown `kind` and
    /// [`DeliveryError::PersistenceFailure`] if the store fails.
    pub async fn delivering_orders(&self, kind: &str, id: i64) -> Result<Vec<OrderEvent>, DeliveryError> {
        let kind: RiderKind = kind.parse()?;
        let rider = RiderIdentity::new(kind, id);
        tracing::debug!(?rider, "Listing delivering orders");

        let records = self.store.list_delivering_by_rider(rider).await?;
        Ok(records.into_iter().map(OrderEvent::from).collect())
    }
}
