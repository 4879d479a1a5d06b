//! In-memory state store with failure injection.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use delivery_core::delivery::{DeliveryRecord, NewDelivery, RiderIdentity};
use delivery_core::ids::{DeliveryId, MerchantOrderId};
use delivery_core::state_store::{StateStore, StoreError, StoreFuture};
use delivery_core::status::OrderStatus;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<MerchantOrderId, DeliveryRecord>,
    next_id: i64,
    insert_attempts: usize,
    update_attempts: usize,
    failing_inserts: usize,
    short_inserts: usize,
    failing_updates: usize,
    stale_updates: usize,
    rejected_updates: usize,
}

impl Inner {
    fn sorted(&self, mut filter: impl FnMut(&DeliveryRecord) -> bool) -> Vec<DeliveryRecord> {
        let mut records: Vec<_> = self.records.values().filter(|r| filter(r)).cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

/// `HashMap`-backed [`StateStore`] for fast, deterministic tests.
///
/// Mirrors the production semantics: batch inserts are all-or-nothing and
/// skip existing orders, conditional updates check id and version and bump the
/// version by one.
///
/// Failures can be injected per call:
///
/// - [`fail_next_inserts`](Self::fail_next_inserts): `insert_all` returns a database error
/// - [`short_next_inserts`](Self::short_next_inserts): `insert_all` reports one record short and commits nothing
/// - [`fail_next_updates`](Self::fail_next_updates): `update_conditional` returns a database error
/// - [`stale_next_updates`](Self::stale_next_updates): `update_conditional` matches zero rows
/// - [`reject_next_updates`](Self::reject_next_updates): `update_conditional` violates a constraint
///
/// # Example
///
/// ```
/// use delivery_testing::{InMemoryStateStore, fixtures};
/// use delivery_core::state_store::StateStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStateStore::new();
/// store.fail_next_inserts(1);
///
/// assert!(store.insert_all(vec![fixtures::new_cooking("M1")]).await.is_err());
/// assert_eq!(store.insert_all(vec![fixtures::new_cooking("M1")]).await?, 1);
/// assert_eq!(store.insert_attempts(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStateStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record as-is, keeping its id and version.
    pub fn seed(&self, record: DeliveryRecord) {
        let mut inner = self.inner.write().unwrap();
        inner.next_id = inner.next_id.max(record.id.value());
        inner.records.insert(record.merchant_order_id.clone(), record);
    }

    /// Current record for an order.
    #[must_use]
    pub fn get(&self, merchant_order_id: &str) -> Option<DeliveryRecord> {
        self.inner
            .read()
            .unwrap()
            .records
            .get(&MerchantOrderId::new(merchant_order_id))
            .cloned()
    }

    /// All records ordered by id.
    #[must_use]
    pub fn records(&self) -> Vec<DeliveryRecord> {
        self.inner.read().unwrap().sorted(|_| true)
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().records.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().records.is_empty()
    }

    /// Make the next `n` calls to `insert_all` fail.
    pub fn fail_next_inserts(&self, n: usize) {
        self.inner.write().unwrap().failing_inserts = n;
    }

    /// Make the next `n` calls to `insert_all` report a short count.
    pub fn short_next_inserts(&self, n: usize) {
        self.inner.write().unwrap().short_inserts = n;
    }

    /// Make the next `n` calls to `update_conditional` fail.
    pub fn fail_next_updates(&self, n: usize) {
        self.inner.write().unwrap().failing_updates = n;
    }

    /// Make the next `n` calls to `update_conditional` match no row, as if a
    /// concurrent writer had bumped the version.
    pub fn stale_next_updates(&self, n: usize) {
        self.inner.write().unwrap().stale_updates = n;
    }

    /// Make the next `n` calls to `update_conditional` fail with a
    /// constraint violation.
    pub fn reject_next_updates(&self, n: usize) {
        self.inner.write().unwrap().rejected_updates = n;
    }

    /// Number of `insert_all` calls so far.
    #[must_use]
    pub fn insert_attempts(&self) -> usize {
        self.inner.read().unwrap().insert_attempts
    }

    /// Number of `update_conditional` calls so far.
    #[must_use]
    pub fn update_attempts(&self) -> usize {
        self.inner.read().unwrap().update_attempts
    }
}

impl StateStore for InMemoryStateStore {
    fn insert_all(&self, records: Vec<NewDelivery>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut inner = self.inner.write().unwrap();
            inner.insert_attempts += 1;

            if inner.failing_inserts > 0 {
                inner.failing_inserts -= 1;
                return Err(StoreError::Database("injected insert failure".to_string()));
            }
            if inner.short_inserts > 0 {
                inner.short_inserts -= 1;
                return Ok(records.len().saturating_sub(1));
            }

            let mut accounted = 0;
            for record in records {
                if !inner.records.contains_key(&record.merchant_order_id) {
                    inner.next_id += 1;
                    let id = DeliveryId::new(inner.next_id);
                    inner
                        .records
                        .insert(record.merchant_order_id.clone(), record.into_record(id));
                }
                accounted += 1;
            }
            Ok(accounted)
        })
    }

    fn find(&self, merchant_order_id: &MerchantOrderId) -> StoreFuture<'_, Option<DeliveryRecord>> {
        let merchant_order_id = merchant_order_id.clone();
        Box::pin(async move { Ok(self.inner.read().unwrap().records.get(&merchant_order_id).cloned()) })
    }

    fn find_in_status(
        &self,
        merchant_order_id: &MerchantOrderId,
        status: OrderStatus,
    ) -> StoreFuture<'_, Option<DeliveryRecord>> {
        let merchant_order_id = merchant_order_id.clone();
        Box::pin(async move {
            Ok(self
                .inner
                .read()
                .unwrap()
                .records
                .get(&merchant_order_id)
                .filter(|record| record.status == status)
                .cloned())
        })
    }

    fn update_conditional(&self, record: &DeliveryRecord) -> StoreFuture<'_, u64> {
        let record = record.clone();
        Box::pin(async move {
            let mut inner = self.inner.write().unwrap();
            inner.update_attempts += 1;

            if inner.failing_updates > 0 {
                inner.failing_updates -= 1;
                return Err(StoreError::Database("injected update failure".to_string()));
            }
            if inner.stale_updates > 0 {
                inner.stale_updates -= 1;
                return Ok(0);
            }
            if inner.rejected_updates > 0 {
                inner.rejected_updates -= 1;
                return Err(StoreError::Constraint("injected constraint violation".to_string()));
            }

            let Some(stored) = inner.records.get_mut(&record.merchant_order_id) else {
                return Ok(0);
            };
            if stored.id != record.id || stored.version != record.version {
                return Ok(0);
            }
            let next = record.version.next();
            *stored = record.with_version(next);
            Ok(1)
        })
    }

    fn list_by_status(&self, status: OrderStatus) -> StoreFuture<'_, Vec<DeliveryRecord>> {
        Box::pin(async move { Ok(self.inner.read().unwrap().sorted(|r| r.status == status)) })
    }

    fn list_delivering_by_rider(&self, rider: RiderIdentity) -> StoreFuture<'_, Vec<DeliveryRecord>> {
        Box::pin(async move {
            Ok(self
                .inner
                .read()
                .unwrap()
                .sorted(|r| r.status == OrderStatus::OrderDelivering && r.rider == Some(rider)))
        })
    }
}
