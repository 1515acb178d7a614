//! Trading lease implementations.
//!
//! Only the lease holder may submit orders. Both hosts point at the same
//! lease store, so ownership changes are atomic regardless of which side
//! initiates them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use robopilot_core::{LeaseInfo, LeaseStore};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::time::Duration;
use tracing::debug;

const LEASE_NAME: &str = "trading";

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0))
}

/// Process-local lease for single-host runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    lease: Mutex<Option<LeaseInfo>>,
}

impl InMemoryLeaseStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let mut lease = self.lease.lock();
        let free = match lease.as_ref() {
            None => true,
            Some(current) => current.holder == holder || current.expires_at < now,
        };
        if free {
            *lease = Some(LeaseInfo {
                holder: holder.to_string(),
                expires_at: expiry(now, ttl),
            });
        }
        Ok(free)
    }

    async fn renew(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let mut lease = self.lease.lock();
        match lease.as_mut() {
            Some(current) if current.holder == holder => {
                current.expires_at = expiry(Utc::now(), ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, holder: &str) -> Result<()> {
        let mut lease = self.lease.lock();
        if lease.as_ref().is_some_and(|l| l.holder == holder) {
            *lease = None;
        }
        Ok(())
    }

    async fn current(&self) -> Result<Option<LeaseInfo>> {
        Ok(self.lease.lock().clone())
    }
}

/// Lease row in a `SQLite` database shared by both hosts.
#[derive(Clone)]
pub struct SqliteLeaseStore {
    pool: SqlitePool,
}

impl SqliteLeaseStore {
    /// # Errors
    ///
    /// Returns error if connection fails or migrations fail.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to open lease database {database_url}"))?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn try_acquire(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();

        // Insert, or take over only if the row is ours or has expired.
        let result = sqlx::query(
            r"
            INSERT INTO trading_lease (name, holder, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE trading_lease.holder = excluded.holder
               OR trading_lease.expires_at < ?4
            ",
        )
        .bind(LEASE_NAME)
        .bind(holder)
        .bind(expiry(now, ttl).timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() == 1;
        debug!(holder, acquired, "Lease acquisition attempted");
        Ok(acquired)
    }

    async fn renew(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let result = sqlx::query("UPDATE trading_lease SET expires_at = ?1 WHERE name = ?2 AND holder = ?3")
            .bind(expiry(Utc::now(), ttl).timestamp_millis())
            .bind(LEASE_NAME)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM trading_lease WHERE name = ?1 AND holder = ?2")
            .bind(LEASE_NAME)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn current(&self) -> Result<Option<LeaseInfo>> {
        let row = sqlx::query_as::<_, (String, i64)>("SELECT holder, expires_at FROM trading_lease WHERE name = ?1")
            .bind(LEASE_NAME)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|(holder, expires_ms)| {
            Utc.timestamp_millis_opt(expires_ms)
                .single()
                .map(|expires_at| LeaseInfo { holder, expires_at })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(15);

    async fn exercise(store: &dyn LeaseStore) {
        assert!(store.try_acquire("local", TTL).await.unwrap());
        // re-acquiring our own lease extends it
        assert!(store.try_acquire("local", TTL).await.unwrap());
        assert!(!store.try_acquire("cloud", TTL).await.unwrap());

        assert!(store.renew("local", TTL).await.unwrap());
        assert!(!store.renew("cloud", TTL).await.unwrap());
        assert_eq!(store.current().await.unwrap().unwrap().holder, "local");

        // releasing someone else's lease does nothing
        store.release("cloud").await.unwrap();
        assert_eq!(store.current().await.unwrap().unwrap().holder, "local");

        store.release("local").await.unwrap();
        assert!(store.current().await.unwrap().is_none());
        assert!(store.try_acquire("cloud", TTL).await.unwrap());
    }

    async fn expired_lease_is_taken_over(store: &dyn LeaseStore) {
        assert!(store.try_acquire("local", Duration::ZERO).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(store.try_acquire("cloud", TTL).await.unwrap());
        assert!(!store.renew("local", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_lease_exclusive() {
        exercise(&InMemoryLeaseStore::new()).await;
    }

    #[tokio::test]
    async fn test_in_memory_lease_expiry() {
        expired_lease_is_taken_over(&InMemoryLeaseStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_lease_exclusive() {
        exercise(&SqliteLeaseStore::new_in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_sqlite_lease_expiry() {
        expired_lease_is_taken_over(&SqliteLeaseStore::new_in_memory().await.unwrap()).await;
    }
}
