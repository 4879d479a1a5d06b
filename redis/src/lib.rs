//! Redis-based lock service.
//!
//! # Architecture
//!
//! Each lock is a single Redis key holding the holder's token:
//! - **Acquire**: `SET key token NX PX ttl`, polled until the wait elapses
//! - **Release**: Lua compare-and-delete, so only the token holder can release
//! - **Expiry**: the `PX` TTL frees keys whose holder crashed
//!
//! # Example
//!
//! ```no_run
//! use delivery_redis::RedisLockService;
//! use delivery_core::lock::LockService;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let locks = RedisLockService::new("redis://127.0.0.1:6379").await?;
//!
//! if let Some(lease) = locks
//!     .try_acquire("lock:delivery:start:M1", Duration::from_secs(3), Duration::from_secs(10))
//!     .await?
//! {
//!     // ... critical section ...
//!     locks.release(&lease).await?;
//! }
//! # Ok(())
//! # }
//! ```

use delivery_core::lock::{LockError, LockFuture, LockLease, LockService};
use redis::Client;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::time::Instant;

/// Deletes `KEYS[1]` only while it still holds `ARGV[1]`.
const RELEASE_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    else
        return 0
    end
";

/// Default pause between acquisition attempts.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// `Redis`-backed [`LockService`].
///
/// This type is `Clone`; clones share the same `ConnectionManager`.
#[derive(Clone)]
pub struct RedisLockService {
    conn_manager: ConnectionManager,
    poll_interval: Duration,
}

impl RedisLockService {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Backend`] if the URL is malformed or the server
    /// cannot be reached.
    pub async fn new(redis_url: &str) -> Result<Self, LockError> {
        let client = Client::open(redis_url)
            .map_err(|e| LockError::Backend(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| LockError::Backend(format!("Failed to create Redis connection manager: {e}")))?;

        tracing::info!("RedisLockService initialized successfully");
        Ok(Self::from_manager(conn_manager))
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub const fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Pause between acquisition attempts while the key is taken.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// One `SET NX PX` attempt. `true` when the key was set.
    async fn try_set(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("Failed to set lock key: {e}")))?;

        match reply.as_deref() {
            Some("OK") => Ok(true),
            None => Ok(false),
            Some(other) => Err(LockError::Protocol(format!("SET NX returned '{other}'"))),
        }
    }

    async fn acquire(&self, key: String, wait: Duration, ttl: Duration) -> Result<Option<LockLease>, LockError> {
        let token = new_token();
        let deadline = Instant::now() + wait;

        loop {
            if self.try_set(&key, &token, ttl).await? {
                tracing::debug!(key = %key, ttl_ms = ttl_millis(ttl), "Lock acquired");
                return Ok(Some(LockLease { key, token }));
            }

            let Some(pause) = next_pause(deadline.saturating_duration_since(Instant::now()), self.poll_interval)
            else {
                tracing::debug!(key = %key, "Lock wait elapsed");
                return Ok(None);
            };
            tokio::time::sleep(pause).await;
        }
    }

    async fn release_lease(&self, lease: LockLease) -> Result<bool, LockError> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&lease.key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("Failed to release lock: {e}")))?;

        if deleted == 0 {
            tracing::warn!(key = %lease.key, "Lock had already expired or changed hands");
        }
        Ok(deleted == 1)
    }
}

impl LockService for RedisLockService {
    fn try_acquire(&self, key: &str, wait: Duration, ttl: Duration) -> LockFuture<'_, Option<LockLease>> {
        Box::pin(self.acquire(key.to_string(), wait, ttl))
    }

    fn release(&self, lease: &LockLease) -> LockFuture<'_, bool> {
        Box::pin(self.release_lease(lease.clone()))
    }
}

/// Holder token, unique per acquisition.
fn new_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// TTL in whole milliseconds, at least one (`PX 0` is rejected by Redis).
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Pause before the next attempt, or `None` once nothing of the wait is left.
fn next_pause(remaining: Duration, poll_interval: Duration) -> Option<Duration> {
    if remaining.is_zero() {
        None
    } else {
        Some(remaining.min(poll_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique() {
        assert_ne!(new_token(), new_token());
    }

    #[test]
    fn ttl_is_whole_millis_and_never_zero() {
        assert_eq!(ttl_millis(Duration::from_secs(10)), 10_000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::ZERO), 1);
    }

    #[test]
    fn pause_is_capped_by_remaining_wait() {
        let poll = Duration::from_millis(50);
        assert_eq!(next_pause(Duration::from_secs(3), poll), Some(poll));
        assert_eq!(next_pause(Duration::from_millis(20), poll), Some(Duration::from_millis(20)));
        assert_eq!(next_pause(Duration::ZERO, poll), None);
    }
}
