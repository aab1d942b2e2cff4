//! Shared fast key-value store used for cross-request state.
//!
//! Rate-limit counters, refresh-token rotation records and single-use token
//! markers all live here. Every mutation is a single atomic operation
//! (`incr_with_ttl`, `set_if_absent`, `compare_and_swap`) so callers never
//! perform read-then-write sequences against shared state.
//!
//! Two backends are provided:
//! - [`PgStore`]: a `kv_store` table in `PostgreSQL`; each operation is one
//!   statement, so instances behind a load balancer share limits and sessions.
//! - [`MemoryStore`]: process-local, for development and tests. Expiry follows
//!   the tokio clock so tests can pause and advance time.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Counter state returned by [`FastStore::incr_with_ttl`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    /// Time left before the counter expires.
    pub ttl: Duration,
}

#[async_trait]
pub trait FastStore: Send + Sync {
    /// Increment `key`, creating it with `ttl` when absent or expired.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError>;

    /// Store `value` only when `key` is absent or expired. Returns `true` if written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Replace the live value of `key` with `new` (refreshing its TTL) only if it
    /// currently equals `expected`. Returns `true` if swapped.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Read the live value of `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Spawn a background task that periodically purges expired entries.
pub fn spawn_purge_task(
    store: Arc<dyn FastStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "purged expired store entries"),
                Err(err) => error!("failed to purge expired store entries: {err}"),
            }
        }
    })
}

/// Milliseconds for SQL interval arithmetic, saturating on overflow.
pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_secs(2)), 2000);
        assert_eq!(duration_millis(Duration::MAX), i64::MAX);
    }

    #[test]
    fn sqlx_errors_map_to_unavailable() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_task_removes_expired_entries() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        store
            .set_if_absent("marker", "1", Duration::from_secs(1))
            .await?;
        assert_eq!(store.len(), 1);

        let handle = spawn_purge_task(store.clone(), Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(store.len(), 0);
        handle.abort();
        Ok(())
    }
}
