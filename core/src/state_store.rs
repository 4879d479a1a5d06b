//! State store trait for delivery records.
//!
//! The store is the source of truth. It supports two kinds of writes:
//!
//! - Transactional batch insert of new records, used by the batch writer.
//! - Conditional update guarded by the record's id and version, used by the
//!   transition coordinator and the rollback pipeline.
//!
//! # Implementations
//!
//! - `PostgresStateStore` (in `delivery-postgres`): production implementation
//! - `InMemoryStateStore` (in `delivery-testing`): fast, deterministic testing
//!
//! # Example
//!
//! ```no_run
//! use delivery_core::state_store::{StateStore, StoreError};
//! use delivery_core::ids::MerchantOrderId;
//! use delivery_core::status::OrderStatus;
//!
//! async fn example<S: StateStore>(store: &S) -> Result<(), StoreError> {
//!     let id = MerchantOrderId::new("M1");
//!     if let Some(record) = store.find_in_status(&id, OrderStatus::OrderCooking).await? {
//!         let updated = record.clone().with_status(OrderStatus::OrderDelivering);
//!         let rows = store.update_conditional(&updated).await?;
//!         assert!(rows <= 1);
//!     }
//!     Ok(())
//! }
//! ```

use crate::delivery::{DeliveryRecord, NewDelivery, RiderIdentity};
use crate::ids::MerchantOrderId;
use crate::status::OrderStatus;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during state store operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Database connection or query failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back into a record.
    #[error("Corrupt row for order '{merchant_order_id}': {reason}")]
    CorruptRow {
        /// Order the row belongs to.
        merchant_order_id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The record violates a storage constraint (e.g. both rider columns set).
    #[error("Constraint violation: {0}")]
    Constraint(String),
}

/// Boxed future returned by [`StateStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Durable keyed storage for delivery records.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the store can be shared as
/// `Arc<dyn StateStore>` by the runtime components.
pub trait StateStore: Send + Sync {
    /// Insert a batch of new records in one transaction.
    ///
    /// Records whose `merchant_order_id` already exists are left untouched and
    /// still counted, so redelivered events are idempotent. Either every
    /// record is accounted for or nothing is committed.
    ///
    /// # Returns
    ///
    /// The number of records accounted for (inserted plus already present).
    ///
    /// # Errors
    ///
    /// - `Database`: the transaction failed and was rolled back
    /// - `Constraint`: a record violates a table constraint
    fn insert_all(&self, records: Vec<NewDelivery>) -> StoreFuture<'_, usize>;

    /// Load the record for an order regardless of its status.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    /// - `CorruptRow`: the stored row is invalid
    fn find(&self, merchant_order_id: &MerchantOrderId) -> StoreFuture<'_, Option<DeliveryRecord>>;

    /// Load the record for an order only if it is in `status`.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    /// - `CorruptRow`: the stored row is invalid
    fn find_in_status(
        &self,
        merchant_order_id: &MerchantOrderId,
        status: OrderStatus,
    ) -> StoreFuture<'_, Option<DeliveryRecord>>;

    /// Overwrite a record if its stored version still equals `record.version`.
    ///
    /// On success the stored version becomes `record.version.next()`.
    ///
    /// # Returns
    ///
    /// Rows affected: `1` on success, `0` when the version is stale or the
    /// record no longer exists. A zero result is a conflict, never merged.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    /// - `Constraint`: the new values violate a table constraint
    fn update_conditional(&self, record: &DeliveryRecord) -> StoreFuture<'_, u64>;

    /// Every record currently in `status`, ordered by id.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    /// - `CorruptRow`: a stored row is invalid
    fn list_by_status(&self, status: OrderStatus) -> StoreFuture<'_, Vec<DeliveryRecord>>;

    /// Records in `ORDER_DELIVERING` carried by `rider`, ordered by id.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    /// - `CorruptRow`: a stored row is invalid
    fn list_delivering_by_rider(&self, rider: RiderIdentity) -> StoreFuture<'_, Vec<DeliveryRecord>>;
}
