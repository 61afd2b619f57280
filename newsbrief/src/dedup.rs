use std::collections::HashSet;
use tracing::{debug, warn};

use crate::article::Article;
use crate::storage::DedupStore;

/// Run-scoped deduplicator.
///
/// Combines an in-memory set (drops repeats inside one fetch, e.g. syndicated stories)
/// with the persistent [`DedupStore`] (drops items delivered in earlier runs). With
/// persistence disabled only the in-memory set applies.
pub struct Deduplicator {
    store: DedupStore,
    persistent: bool,
    in_run: HashSet<String>,
}

impl Deduplicator {
    pub fn new(store: DedupStore, persistent: bool) -> Self {
        Self {
            store,
            persistent,
            in_run: HashSet::new(),
        }
    }

    /// Store lookup. Errors fail open: the article is treated as new.
    pub async fn seen(&self, fingerprint: &str) -> bool {
        if !self.persistent {
            return false;
        }
        match self.store.contains(fingerprint).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Dedup lookup failed, treating {} as new: {:#}", fingerprint, e);
                false
            }
        }
    }

    /// Keeps the first occurrence of every fingerprint that is neither repeated in this
    /// run nor already in the store.
    pub async fn filter_new(&mut self, articles: Vec<Article>) -> Vec<Article> {
        let total = articles.len();
        let mut fresh = Vec::with_capacity(total);

        for article in articles {
            if !self.in_run.insert(article.fingerprint().to_string()) {
                debug!("Duplicate within run: {}", article.url());
                continue;
            }
            if self.seen(article.fingerprint()).await {
                debug!("Already delivered: {}", article.url());
                continue;
            }
            fresh.push(article);
        }

        debug!("Dedup kept {}/{} articles", fresh.len(), total);
        fresh
    }

    /// Persists the articles. Failures are logged and skipped.
    pub async fn record(&self, articles: &[Article]) -> usize {
        if !self.persistent {
            return 0;
        }
        let mut written = 0;
        for article in articles {
            match self.store.insert(article).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to record {}: {:#}", article.url(), e),
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> DedupStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        DedupStore::open(pool).await.unwrap()
    }

    fn article(url: &str, source: &str) -> Article {
        Article::new(url, "Title", "", source, 1, Utc::now())
    }

    #[tokio::test]
    async fn same_url_from_two_sources_is_kept_once() {
        let mut dedup = Deduplicator::new(store().await, true);
        let kept = dedup
            .filter_new(vec![
                article("https://example.com/story", "A"),
                article("https://example.com/story", "B"),
                article("https://example.com/other", "B"),
            ])
            .await;
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].source_name(), "A");
    }

    #[tokio::test]
    async fn recorded_articles_are_suppressed_next_run() {
        let store = store().await;
        let first_run = Deduplicator::new(store.clone(), true);
        assert_eq!(first_run.record(&[article("https://example.com/a", "A")]).await, 1);
        assert_eq!(first_run.record(&[article("https://example.com/a", "A")]).await, 0);

        let mut second_run = Deduplicator::new(store, true);
        let kept = second_run
            .filter_new(vec![article("https://example.com/a", "A"), article("https://example.com/b", "A")])
            .await;
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url(), "https://example.com/b");
    }

    #[tokio::test]
    async fn disabled_persistence_only_dedups_within_run() {
        let store = store().await;
        let dedup = Deduplicator::new(store.clone(), false);
        assert_eq!(dedup.record(&[article("https://example.com/a", "A")]).await, 0);
        assert_eq!(store.count().await.unwrap(), 0);

        let mut dedup = Deduplicator::new(store, false);
        let kept = dedup
            .filter_new(vec![article("https://example.com/a", "A"), article("https://example.com/a", "B")])
            .await;
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn lookup_errors_fail_open() {
        let store = store().await;
        store.pool().close().await;
        let dedup = Deduplicator::new(store, true);
        assert!(!dedup.seen("abc").await);
    }

    #[tokio::test]
    async fn record_errors_are_skipped() {
        let store = store().await;
        store.pool().close().await;
        let dedup = Deduplicator::new(store, true);
        let written = dedup
            .record(&[article("https://example.com/a", "A"), article("https://example.com/b", "A")])
            .await;
        assert_eq!(written, 0);
    }
}
