//! Cache repository: TTL key/value storage for fetched market data

use crate::{DbError, DbResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A stored cache entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CacheEntryRecord {
    pub key: String,
    pub value: String,
    /// Unix milliseconds
    pub expires_at: i64,
}

/// Repository for cached market data
pub struct CacheRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CacheRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get an entry's value if it exists and has not expired
    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let now = Utc::now().timestamp_millis();
        let record = sqlx::query_as::<_, CacheEntryRecord>(
            "SELECT key, value, expires_at FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| query_error("get", e))?;

        Ok(record.map(|r| r.value))
    }

    /// Insert or replace an entry that expires `ttl_ms` from now
    pub async fn set(&self, key: &str, value: &str, ttl_ms: i64) -> DbResult<()> {
        let expires_at = Utc::now().timestamp_millis() + ttl_ms;
        sqlx::query(
            r#"INSERT INTO cache_entries (key, value, expires_at)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 expires_at = excluded.expires_at,
                 created_at = strftime('%s', 'now')
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(self.pool)
        .await
        .map_err(|e| query_error("set", e))?;

        Ok(())
    }

    /// Delete every entry, returning how many were removed
    pub async fn clear(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(self.pool)
            .await
            .map_err(|e| query_error("clear", e))?;
        Ok(result.rows_affected())
    }

    /// Delete expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> DbResult<u64> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?1")
            .bind(now)
            .execute(self.pool)
            .await
            .map_err(|e| query_error("purge", e))?;
        Ok(result.rows_affected())
    }

    /// Number of entries, expired or not
    pub async fn count(&self) -> DbResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(self.pool)
            .await
            .map_err(|e| query_error("count", e))?;
        Ok(count.0)
    }
}

fn query_error(op: &str, e: sqlx::Error) -> DbError {
    DbError::Query(format!("cache {op}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_set_then_get() {
        let db = Database::in_memory().await.unwrap();
        let repo = CacheRepository::new(db.pool());

        repo.set("scan:instruments:200", "[1,2,3]", 60_000).await.unwrap();
        assert_eq!(
            repo.get("scan:instruments:200").await.unwrap().as_deref(),
            Some("[1,2,3]")
        );
        assert_eq!(repo.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_replaces_value() {
        let db = Database::in_memory().await.unwrap();
        let repo = CacheRepository::new(db.pool());

        repo.set("k", "old", 60_000).await.unwrap();
        repo.set("k", "new", 60_000).await.unwrap();
        assert_eq!(repo.get("k").await.unwrap().as_deref(), Some("new"));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_hidden_and_purged() {
        let db = Database::in_memory().await.unwrap();
        let repo = CacheRepository::new(db.pool());

        repo.set("stale", "v", -1_000).await.unwrap();
        repo.set("fresh", "v", 60_000).await.unwrap();
        assert_eq!(repo.get("stale").await.unwrap(), None);

        assert_eq!(repo.purge_expired().await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let db = Database::in_memory().await.unwrap();
        let repo = CacheRepository::new(db.pool());

        repo.set("a", "1", 60_000).await.unwrap();
        repo.set("b", "2", 60_000).await.unwrap();
        assert_eq!(repo.clear().await.unwrap(), 2);
        assert_eq!(repo.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_query_maps_to_query_error() {
        let db = Database::in_memory().await.unwrap();
        sqlx::query("DROP TABLE cache_entries")
            .execute(db.pool())
            .await
            .unwrap();
        let repo = CacheRepository::new(db.pool());

        match repo.get("k").await {
            Err(DbError::Query(msg)) => assert!(msg.starts_with("cache get")),
            other => panic!("expected a query error, got {other:?}"),
        }
        assert!(matches!(repo.set("k", "v", 1_000).await, Err(DbError::Query(_))));
    }
}
