//! SQLite-backed key-value store.
//!
//! Lets several engine processes on one host share cache entries and rate
//! limit windows. Expiry is stored as unix milliseconds and enforced on read;
//! every `SWEEP_INTERVAL` writes a bulk delete clears rows that expired
//! without being read again.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::infrastructure::ports::{ClockPort, KeyValueStore, StoreError};

/// Writes between bulk expiry deletes.
const SWEEP_INTERVAL: u64 = 1024;

/// SQLite implementation of the key-value store port.
pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn ClockPort>,
    writes: AtomicU64,
    sweep_every: u64,
}

impl SqliteStore {
    pub async fn new(db_path: &str, clock: Arc<dyn ClockPort>) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .map_err(|e| StoreError::backend("connect", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                expires_at INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::backend("migrate", e))?;

        Ok(Self {
            pool,
            clock,
            writes: AtomicU64::new(0),
            sweep_every: SWEEP_INTERVAL,
        })
    }

    /// Delete every expired row. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(self.now_ms())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::backend("purge_expired", e))?;
        Ok(result.rows_affected())
    }

    async fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.sweep_every != 0 {
            return;
        }
        match self.purge_expired().await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Swept expired key-value rows"),
            Err(e) => tracing::warn!(error = %e, "Expiry sweep failed"),
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn expiry_ms(&self, ttl: Duration) -> i64 {
        self.now_ms()
            .saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.now_ms();
        let row = sqlx::query("SELECT value, expires_at FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::backend("get", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: Option<i64> = row.get("expires_at");
        if expires_at.is_some_and(|at| at <= now) {
            sqlx::query("DELETE FROM kv_entries WHERE key = ? AND expires_at <= ?")
                .bind(key)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::backend("get", e))?;
            return Ok(None);
        }

        Ok(Some(row.get("value")))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(self.expiry_ms(ttl))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::backend("set_with_ttl", e))?;
        self.record_write().await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::backend("delete", e))?;
        Ok(())
    }

    async fn increment_window(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = self.now_ms();
        let expires_at = self.expiry_ms(window);

        // Single statement: create-with-expiry, restart-if-expired, or increment.
        let row = sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES (?, '1', ?)
            ON CONFLICT(key) DO UPDATE SET
                value = CASE
                    WHEN kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= ?
                        THEN '1'
                    ELSE CAST(CAST(kv_entries.value AS INTEGER) + 1 AS TEXT)
                END,
                expires_at = CASE
                    WHEN kv_entries.expires_at IS NULL OR kv_entries.expires_at <= ?
                        THEN ?
                    ELSE kv_entries.expires_at
                END
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(expires_at)
        .bind(now)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::backend("increment_window", e))?;

        let value: String = row.get("value");
        self.record_write().await;
        value
            .parse()
            .map_err(|_| StoreError::backend("increment_window", "value is not an integer"))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::backend("ping", e))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
