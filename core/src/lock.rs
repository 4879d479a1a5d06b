//! Distributed mutual exclusion keyed by order.
//!
//! A [`LockService`] hands out leases with a bounded wait and a bounded hold
//! (TTL). A lease is only released by the holder that owns its token, so an
//! expired lease re-acquired by someone else is never released by mistake.
//!
//! [`LockGuard`] scopes a lease: release it explicitly with
//! [`LockGuard::release`] on the normal path; if the guard is dropped while
//! still holding the lease, a release is spawned on the current runtime and
//! the TTL covers the case where no runtime is available.

use crate::ids::MerchantOrderId;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Prefix of the lock taken while starting a delivery.
pub const START_DELIVERY_LOCK_PREFIX: &str = "lock:delivery:start:";

/// Lock key serializing `start_delivery` calls for one order.
#[must_use]
pub fn start_delivery_key(merchant_order_id: &MerchantOrderId) -> String {
    format!("{START_DELIVERY_LOCK_PREFIX}{merchant_order_id}")
}

/// Errors from the lock backend itself. Failing to get the lock in time is
/// not an error; it is reported as `Ok(None)` by [`LockService::try_acquire`].
#[derive(Error, Debug, Clone)]
pub enum LockError {
    /// The backend could not be reached.
    #[error("Lock backend unavailable: {0}")]
    Backend(String),

    /// The backend answered with something unexpected.
    #[error("Unexpected lock backend response: {0}")]
    Protocol(String),
}

/// Proof of holding a lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockLease {
    /// Lock key.
    pub key: String,
    /// Holder token, unique per acquisition.
    pub token: String,
}

/// Boxed future returned by [`LockService`] methods.
pub type LockFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LockError>> + Send + 'a>>;

/// Distributed lock keyed by string.
pub trait LockService: Send + Sync {
    /// Try to take `key`, waiting at most `wait`. The lease expires after
    /// `ttl` if never released.
    ///
    /// # Returns
    ///
    /// `Some(lease)` when acquired, `None` when the wait elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the backend fails.
    fn try_acquire(&self, key: &str, wait: Duration, ttl: Duration) -> LockFuture<'_, Option<LockLease>>;

    /// Release a lease.
    ///
    /// # Returns
    ///
    /// `true` if the lease was still held by its token and is now released,
    /// `false` if it had already expired or changed hands.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the backend fails.
    fn release(&self, lease: &LockLease) -> LockFuture<'_, bool>;
}

/// A held lock that is released when the scope ends.
pub struct LockGuard {
    service: Arc<dyn LockService>,
    lease: Option<LockLease>,
}

impl LockGuard {
    /// Acquire `key` through `service`.
    ///
    /// # Returns
    ///
    /// `None` when the lock could not be taken within `wait`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the backend fails.
    pub async fn acquire(
        service: Arc<dyn LockService>,
        key: &str,
        wait: Duration,
        ttl: Duration,
    ) -> Result<Option<Self>, LockError> {
        let lease = service.try_acquire(key, wait, ttl).await?;
        Ok(lease.map(|lease| Self {
            service,
            lease: Some(lease),
        }))
    }

    /// The lock key.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.lease.as_ref().map(|lease| lease.key.as_str())
    }

    /// Release the lock now.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the backend fails. The TTL still bounds how
    /// long the key stays taken.
    pub async fn release(mut self) -> Result<bool, LockError> {
        match self.lease.take() {
            Some(lease) => self.service.release(&lease).await,
            None => Ok(false),
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("lease", &self.lease).finish_non_exhaustive()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let service = Arc::clone(&self.service);
                handle.spawn(async move {
                    if let Err(e) = service.release(&lease).await {
                        tracing::warn!(key = %lease.key, error = %e, "Deferred lock release failed");
                    }
                });
            },
            Err(_) => {
                tracing::warn!(
                    key = %lease.key,
                    "Lock guard dropped outside a runtime; lock expires with its TTL"
                );
            },
        }
    }
}
