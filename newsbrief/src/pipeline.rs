use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{Config, PipelineConfig, PriceConfig, SourceConfig};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::cmp::Reverse;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::article::Article;
use crate::classifier::RelevanceClassifier;
use crate::dedup::Deduplicator;
use crate::delivery::{DigestFormatter, DigestSender};
use crate::ingestion::{self, NormalizeOptions};
use crate::llm::summarizer::Summarizer;
use crate::price;
use crate::ranking::Ranker;
use crate::storage::DedupStore;

/// Counters of one cycle, logged at the end and returned to the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub sources: usize,
    pub sources_completed: usize,
    pub relevant: usize,
    pub fresh: usize,
    /// Articles in the digest after ranking and truncation
    pub ranked: usize,
    pub recorded: usize,
    /// The run deadline expired before every source finished
    pub truncated: bool,
    /// Whether the digest reached the chat (always false on a dry run)
    pub sent: bool,
}

/// One fetch → classify → dedup → rank → deliver cycle.
pub struct Pipeline {
    settings: PipelineConfig,
    sources: Vec<SourceConfig>,
    client: Client,
    fetch_retries: u32,
    classifier: RelevanceClassifier,
    ranker: Ranker,
    formatter: DigestFormatter,
    store: DedupStore,
    summarizer: Option<Summarizer>,
    sender: Option<DigestSender>,
    price: Option<PriceConfig>,
}

impl Pipeline {
    pub fn new(config: &Config, client: Client, store: DedupStore) -> Self {
        let settings = config.pipeline.clone();
        Self {
            classifier: RelevanceClassifier::from_config(&settings),
            ranker: Ranker::new(settings.ranking.clone(), settings.max_articles),
            formatter: DigestFormatter::new(settings.display_utc_offset_hours),
            sources: config.sources.clone(),
            fetch_retries: config.http.max_retries,
            price: config.price.clone(),
            settings,
            client,
            store,
            summarizer: None,
            sender: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_sender(mut self, sender: DigestSender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    /// Unit of work for one source: fetch, classify and optionally summarize.
    async fn process_source(&self, source: &SourceConfig, cutoff: DateTime<Utc>) -> Vec<Article> {
        let opts = NormalizeOptions {
            max_entries: self.settings.max_entries_per_feed,
            max_retries: self.fetch_retries,
        };
        let fetched = ingestion::fetch_source(&self.client, source, cutoff, opts).await;
        let total = fetched.len();

        let mut relevant = Vec::new();
        for mut article in fetched {
            if !self
                .classifier
                .is_relevant(&article.title, article.body(), source.crypto_only)
            {
                continue;
            }
            article.relevance_score = Some(self.classifier.score(&article.title, article.body()));

            if let Some(summarizer) = &self.summarizer {
                // no point paying for a summary that the dedup stage will drop
                let known = self.settings.deduplication
                    && self.store.contains(article.fingerprint()).await.unwrap_or(false);
                if !known {
                    summarizer.apply(&mut article).await;
                }
            }
            relevant.push(article);
        }

        info!(source = %source.name, "{}/{} entries relevant", relevant.len(), total);
        relevant
    }

    /// Fetches all sources with bounded parallelism until done or until `deadline`.
    /// Returns the gathered articles, the number of finished sources and whether the
    /// deadline cut the fetch short.
    ///
    /// Batches are merged by descending source priority, then configuration order, so
    /// the copy of a syndicated story that survives dedup does not depend on which
    /// fetch finished first.
    pub async fn collect(&self, cutoff: DateTime<Utc>, deadline: Instant) -> (Vec<Article>, usize, bool) {
        let concurrency = self.settings.fetch_concurrency.max(1);
        let mut workers = stream::iter(self.sources.iter().enumerate())
            .map(|(index, source)| async move { (index, self.process_source(source, cutoff).await) })
            .buffer_unordered(concurrency);

        let mut batches = Vec::new();
        let mut gathered = 0;
        let mut truncated = false;

        loop {
            match tokio::time::timeout_at(deadline, workers.next()).await {
                Ok(Some((index, batch))) => {
                    gathered += batch.len();
                    batches.push((index, batch));
                }
                Ok(None) => break,
                Err(_) => {
                    truncated = true;
                    warn!(
                        "Run deadline reached: {}/{} sources finished, continuing with {} articles",
                        batches.len(),
                        self.sources.len(),
                        gathered
                    );
                    break;
                }
            }
        }

        let completed = batches.len();
        batches.sort_by_key(|(index, _)| (Reverse(self.sources[*index].priority), *index));
        let articles = batches.into_iter().flat_map(|(_, batch)| batch).collect();

        (articles, completed, truncated)
    }

    /// Runs one cycle. Nothing in here is fatal: failures degrade to fewer (or zero)
    /// delivered articles and are visible in the report.
    pub async fn run_once(&self, dry_run: bool) -> RunReport {
        let started = Utc::now();
        let cutoff = started - ChronoDuration::hours(self.settings.hours_lookback);
        let deadline = Instant::now() + Duration::from_secs(self.settings.run_timeout_seconds);

        let mut report = RunReport {
            sources: self.sources.len(),
            ..RunReport::default()
        };
        info!(sources = report.sources, %cutoff, "Starting news cycle");

        let (relevant, completed, truncated) = self.collect(cutoff, deadline).await;
        report.sources_completed = completed;
        report.truncated = truncated;
        report.relevant = relevant.len();

        let mut dedup = Deduplicator::new(self.store.clone(), self.settings.deduplication);
        let fresh = dedup.filter_new(relevant).await;
        report.fresh = fresh.len();

        let ranked = self.ranker.rank(fresh, Utc::now());
        report.ranked = ranked.len();

        let snapshot = match &self.price {
            Some(cfg) => price::fetch_btc_price(&self.client, cfg).await,
            None => None,
        };

        let digest = self.formatter.format(&ranked, snapshot.as_ref(), Utc::now());

        if dry_run {
            // nothing is recorded, the next real run delivers the same articles
            info!("Dry run, digest not sent:\n{}", digest);
        } else {
            if let Some(sender) = &self.sender {
                report.sent = sender.send(&digest).await;
            } else {
                warn!("No chat transport configured, digest not sent");
            }

            if report.sent {
                report.recorded = dedup.record(&ranked).await;
            } else {
                warn!("Digest not delivered; {} articles stay eligible for the next cycle", ranked.len());
            }
        }

        info!(
            relevant = report.relevant,
            fresh = report.fresh,
            ranked = report.ranked,
            sent = report.sent,
            "News cycle finished in {}s",
            (Utc::now() - started).num_seconds()
        );
        report
    }
}

/// Retention sweep, run separately from the fetch cycle.
pub async fn purge(store: &DedupStore, retention_days: u32) -> Result<u64> {
    store.purge(retention_days).await
}
