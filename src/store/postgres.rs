//! `PostgreSQL`-backed store.
//!
//! Each operation is a single statement, so concurrent callers on any number of
//! service instances observe atomic increments and swaps. Expired rows are
//! treated as absent and removed by [`FastStore::purge_expired`].

use async_trait::async_trait;
use sqlx::{Connection, PgPool, Row};
use std::time::Duration;
use tracing::{Instrument, info_span};

use super::{Counter, FastStore, StoreError, duration_millis};

pub(crate) const SCHEMA_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/db/sql/01_warden.sql"
));

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables used by the core if they do not exist yet.
    ///
    /// # Errors
    /// Returns an error if the schema statements fail.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::Executor::execute(&self.pool, SCHEMA_SQL).await?;
        Ok(())
    }
}

fn query_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl FastStore for PgStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError> {
        let query = r"
            INSERT INTO kv_store (key, counter, expires_at)
            VALUES ($1, 1, NOW() + ($2 * INTERVAL '1 millisecond'))
            ON CONFLICT (key) DO UPDATE SET
                counter = CASE
                    WHEN kv_store.expires_at <= NOW() THEN 1
                    ELSE kv_store.counter + 1
                END,
                expires_at = CASE
                    WHEN kv_store.expires_at <= NOW() THEN EXCLUDED.expires_at
                    ELSE kv_store.expires_at
                END
            RETURNING counter,
                GREATEST(0, CEIL(EXTRACT(EPOCH FROM (expires_at - NOW())) * 1000))::BIGINT AS ttl_ms
        ";
        let row = sqlx::query(query)
            .bind(key)
            .bind(duration_millis(ttl))
            .fetch_one(&self.pool)
            .instrument(query_span("UPSERT", query))
            .await?;

        let count: i64 = row.get("counter");
        let ttl_ms: i64 = row.get("ttl_ms");
        Ok(Counter {
            count: u64::try_from(count).unwrap_or(0),
            ttl: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
        })
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        // The conditional DO UPDATE only overwrites rows that have already expired.
        let query = r"
            INSERT INTO kv_store (key, value, counter, expires_at)
            VALUES ($1, $2, 0, NOW() + ($3 * INTERVAL '1 millisecond'))
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                counter = 0,
                expires_at = EXCLUDED.expires_at
            WHERE kv_store.expires_at <= NOW()
            RETURNING key
        ";
        let row = sqlx::query(query)
            .bind(key)
            .bind(value)
            .bind(duration_millis(ttl))
            .fetch_optional(&self.pool)
            .instrument(query_span("UPSERT", query))
            .await?;
        Ok(row.is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE kv_store
            SET value = $3,
                expires_at = NOW() + ($4 * INTERVAL '1 millisecond')
            WHERE key = $1
              AND value = $2
              AND expires_at > NOW()
            RETURNING key
        ";
        let row = sqlx::query(query)
            .bind(key)
            .bind(expected)
            .bind(new)
            .bind(duration_millis(ttl))
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await?;
        Ok(row.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let query = "SELECT value FROM kv_store WHERE key = $1 AND expires_at > NOW()";
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(row.map(|row| row.get("value")))
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let query = "DELETE FROM kv_store WHERE expires_at <= NOW()";
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .instrument(info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            ))
            .await?;
        conn.ping()
            .instrument(info_span!(
                "db.ping",
                db.system = "postgresql",
                db.operation = "PING"
            ))
            .await?;
        Ok(())
    }
}
