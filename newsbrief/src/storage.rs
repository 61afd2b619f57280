use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::article::Article;

/// Persistent record of delivered fingerprints, backed by the `seen_articles` table.
///
/// Reads go straight to the pool. Writes take `write_lock` so only one insert or delete
/// is in flight at a time; the UNIQUE constraint on `fingerprint` is the backstop.
#[derive(Clone)]
pub struct DedupStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl DedupStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Opens the store and makes sure its schema exists.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        debug!("storage: ensuring seen_articles schema");
        let stmts = [
            r#"
            CREATE TABLE IF NOT EXISTS seen_articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL,
                title TEXT,
                source TEXT,
                published_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_seen_articles_created_at ON seen_articles(created_at);",
        ];

        for stmt in stmts {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("failed to create seen_articles schema")?;
        }
        Ok(())
    }

    pub async fn contains(&self, fingerprint: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM seen_articles WHERE fingerprint = ? LIMIT 1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .context("failed to look up fingerprint")?;
        Ok(found.is_some())
    }

    /// Inserts a record for the article unless its fingerprint is already stored.
    /// Returns whether a row was written.
    pub async fn insert(&self, article: &Article) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO seen_articles (fingerprint, url, title, source, published_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(article.fingerprint())
        .bind(article.url())
        .bind(&article.title)
        .bind(article.source_name())
        .bind(article.published_at())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("failed to insert seen article")?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes records first seen before `cutoff`. Returns the number of rows removed.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM seen_articles WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("failed to purge seen articles")?;
        Ok(result.rows_affected())
    }

    /// Retention sweep: drop everything older than `retention_days`.
    pub async fn purge(&self, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let removed = self.delete_older_than(cutoff).await?;
        info!("Purged {} seen-article records older than {} days", removed, retention_days);
        Ok(removed)
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM seen_articles")
            .fetch_one(&self.pool)
            .await
            .context("failed to count seen articles")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> DedupStore {
        // one connection, otherwise every connection gets its own in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        DedupStore::open(pool).await.unwrap()
    }

    fn article(url: &str) -> Article {
        Article::new(url, "Title", "Body", "Feed", 1, Utc::now())
    }

    #[tokio::test]
    async fn empty_store_has_seen_nothing() {
        let store = memory_store().await;
        assert!(!store.contains("deadbeef").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let store = memory_store().await;
        let a = article("https://example.com/a");

        assert!(store.insert(&a).await.unwrap());
        assert!(!store.insert(&a).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.contains(a.fingerprint()).await.unwrap());
    }

    #[tokio::test]
    async fn schema_creation_can_run_twice() {
        let store = memory_store().await;
        store.ensure_schema().await.unwrap();
        store.insert(&article("https://example.com/x")).await.unwrap();
        store.ensure_schema().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_older_than_only_removes_stale_rows() {
        let store = memory_store().await;
        store.insert(&article("https://example.com/a")).await.unwrap();
        store.insert(&article("https://example.com/b")).await.unwrap();

        let removed = store.delete_older_than(Utc::now() - Duration::days(1)).await.unwrap();
        assert_eq!(removed, 0);

        let removed = store.delete_older_than(Utc::now() + Duration::seconds(5)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
