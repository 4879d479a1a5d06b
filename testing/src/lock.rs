//! In-memory lock service.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use delivery_core::lock::{LockError, LockFuture, LockLease, LockService};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
struct Held {
    token: String,
    expires_at: Instant,
}

/// Process-local [`LockService`] with TTL expiry on the tokio clock.
///
/// Works with `start_paused` tests: waiting and expiry follow
/// `tokio::time::advance`.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLockService {
    held: Arc<Mutex<HashMap<String, Held>>>,
    tokens: Arc<AtomicU64>,
    releases: Arc<AtomicU64>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLockService {
    /// Create a lock service with no held keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held and not expired.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|held| held.expires_at > Instant::now())
    }

    /// Number of successful releases.
    #[must_use]
    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    /// Simulate the backend being down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LockError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LockError::Backend("injected lock backend outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn try_take(&self, key: &str, ttl: Duration) -> Option<LockLease> {
        let mut held = self.held.lock().unwrap();
        let now = Instant::now();
        if held.get(key).is_some_and(|h| h.expires_at > now) {
            return None;
        }
        let token = format!("token-{}", self.tokens.fetch_add(1, Ordering::SeqCst));
        held.insert(
            key.to_string(),
            Held {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );
        Some(LockLease {
            key: key.to_string(),
            token,
        })
    }
}

impl LockService for InMemoryLockService {
    fn try_acquire(&self, key: &str, wait: Duration, ttl: Duration) -> LockFuture<'_, Option<LockLease>> {
        let key = key.to_string();
        Box::pin(async move {
            self.check_available()?;
            let deadline = Instant::now() + wait;
            loop {
                if let Some(lease) = self.try_take(&key, ttl) {
                    return Ok(Some(lease));
                }
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
            }
        })
    }

    fn release(&self, lease: &LockLease) -> LockFuture<'_, bool> {
        let lease = lease.clone();
        Box::pin(async move {
            self.check_available()?;
            let mut held = self.held.lock().unwrap();
            if held.get(&lease.key).is_some_and(|h| h.token == lease.token) {
                held.remove(&lease.key);
                self.releases.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            } else {
                Ok(false)
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn second_acquire_times_out_while_held() {
        let locks = InMemoryLockService::new();
        let lease = locks
            .try_acquire("k", Duration::ZERO, TTL)
            .await
            .expect("backend")
            .expect("acquired");

        let started = Instant::now();
        let second = locks.try_acquire("k", Duration::from_secs(3), TTL).await.expect("backend");
        assert!(second.is_none());
        assert!(started.elapsed() >= Duration::from_secs(3));

        assert!(locks.release(&lease).await.expect("backend"));
        assert!(!locks.is_held("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_can_be_taken_and_old_token_cannot_release() {
        let locks = InMemoryLockService::new();
        let old = locks
            .try_acquire("k", Duration::ZERO, Duration::from_secs(1))
            .await
            .expect("backend")
            .expect("acquired");

        tokio::time::advance(Duration::from_secs(2)).await;

        let new = locks
            .try_acquire("k", Duration::ZERO, TTL)
            .await
            .expect("backend")
            .expect("expired lock is free");
        assert!(!locks.release(&old).await.expect("backend"));
        assert!(locks.is_held("k"));
        assert!(locks.release(&new).await.expect("backend"));
    }

    #[tokio::test]
    async fn outage_surfaces_as_backend_error() {
        let locks = InMemoryLockService::new();
        locks.set_unavailable(true);
        assert!(locks.try_acquire("k", Duration::ZERO, TTL).await.is_err());
    }
}
