use chrono::{DateTime, Utc};
use common::RankingConfig;

use crate::article::Article;

/// Recency steps as (max age in hours, score). Older than the last step scores
/// `STALE_RECENCY`.
const RECENCY_STEPS: &[(f64, f64)] = &[(1.0, 1.0), (2.0, 0.9), (4.0, 0.7), (8.0, 0.5)];
const STALE_RECENCY: f64 = 0.3;

const PRIORITY_SATURATION: f64 = 3.0;
const ENGAGEMENT_SATURATION: f64 = 1000.0;

pub fn recency_score(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - published_at).num_seconds() as f64 / 3600.0;
    RECENCY_STEPS
        .iter()
        .find(|(limit, _)| age_hours < *limit)
        .map(|(_, score)| *score)
        .unwrap_or(STALE_RECENCY)
}

pub fn source_score(priority: u32) -> f64 {
    (priority as f64 / PRIORITY_SATURATION).min(1.0)
}

pub fn engagement_score(engagement: u64) -> f64 {
    (engagement as f64 / ENGAGEMENT_SATURATION).min(1.0)
}

#[derive(Debug, Clone)]
pub struct Ranker {
    weights: RankingConfig,
    max_articles: usize,
}

impl Ranker {
    pub fn new(weights: RankingConfig, max_articles: usize) -> Self {
        Self { weights, max_articles }
    }

    pub fn score(&self, article: &Article, now: DateTime<Utc>) -> f64 {
        self.weights.recency_weight * recency_score(article.published_at(), now)
            + self.weights.source_weight * source_score(article.source_priority())
            + self.weights.engagement_weight * engagement_score(article.engagement())
    }

    /// Scores, sorts descending (stable for equal scores) and truncates to `max_articles`.
    pub fn rank(&self, mut articles: Vec<Article>, now: DateTime<Utc>) -> Vec<Article> {
        for article in articles.iter_mut() {
            article.rank_score = self.score(article, now);
        }
        articles.sort_by(|a, b| b.rank_score.total_cmp(&a.rank_score));
        articles.truncate(self.max_articles);
        articles
    }
}
