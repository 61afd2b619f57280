use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Deterministic identifier of an article: hex SHA-256 of its canonical URL.
pub fn fingerprint(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// A normalized feed item flowing through one pipeline cycle.
///
/// Identity fields are fixed at construction; only the display text and the
/// derived scores may change afterwards.
#[derive(Debug, Clone)]
pub struct Article {
    fingerprint: String,
    url: String,
    source_name: String,
    source_priority: u32,
    published_at: DateTime<Utc>,
    engagement: u64,
    /// Cleaned feed text before the display cap
    body: String,
    pub title: String,
    pub body_excerpt: String,
    pub relevance_score: Option<u32>,
    pub rank_score: f64,
}

impl Article {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        body_excerpt: impl Into<String>,
        source_name: impl Into<String>,
        source_priority: u32,
        published_at: DateTime<Utc>,
    ) -> Self {
        let url = url.into();
        let body_excerpt = body_excerpt.into();
        Self {
            fingerprint: fingerprint(&url),
            url,
            source_name: source_name.into(),
            source_priority,
            published_at,
            engagement: 0,
            body: body_excerpt.clone(),
            title: title.into(),
            body_excerpt,
            relevance_score: None,
            rank_score: 0.0,
        }
    }

    pub fn with_engagement(mut self, engagement: u64) -> Self {
        self.engagement = engagement;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn source_priority(&self) -> u32 {
        self.source_priority
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn engagement(&self) -> u64 {
        self.engagement
    }

    /// Full cleaned body, used for classification and as summarizer input.
    pub fn body(&self) -> &str {
        &self.body
    }
}
