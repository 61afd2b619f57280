use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::LlmProvider;
use crate::article::Article;
use crate::ingestion::{clean_text, BODY_MAX_CHARS, TITLE_MAX_CHARS};
use crate::scraping;

/// Rewrites article title and excerpt through an [`LlmProvider`].
///
/// Every call, page scrape included, is bounded by its own timeout. On failure or
/// timeout the article keeps its cleaned feed text.
#[derive(Clone)]
pub struct Summarizer {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
    /// Set when article pages should be scraped for fuller input
    scrape_client: Option<Client>,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            scrape_client: None,
        }
    }

    pub fn with_full_text(mut self, client: Client) -> Self {
        self.scrape_client = Some(client);
        self
    }

    async fn source_text(&self, article: &Article) -> String {
        if let Some(client) = &self.scrape_client {
            match scraping::scrape_article_content(client, article.url()).await {
                Ok(text) if !text.is_empty() => return text,
                Ok(_) => {}
                Err(e) => debug!("Full text unavailable for {}: {:#}", article.url(), e),
            }
        }
        article.body().to_string()
    }

    /// Returns true when the article text was replaced.
    pub async fn apply(&self, article: &mut Article) -> bool {
        let call = async {
            let content = self.source_text(article).await;
            self.provider.summarize(&article.title, &content, article.url()).await
        };

        let outcome = tokio::time::timeout(self.timeout, call).await;
        match outcome {
            Ok(Ok(summary)) => {
                debug!(
                    "Summarized {} with {} ({} tokens)",
                    article.url(),
                    self.provider.model_name(),
                    summary.usage.total_tokens
                );
                article.title = clean_text(&summary.translated_title, TITLE_MAX_CHARS);
                if !summary.summary.is_empty() {
                    article.body_excerpt = clean_text(&summary.summary, BODY_MAX_CHARS);
                }
                true
            }
            Ok(Err(e)) => {
                warn!("Summarization failed for {}, keeping original text: {:#}", article.url(), e);
                false
            }
            Err(_) => {
                warn!(
                    "Summarization timed out after {:?} for {}, keeping original text",
                    self.timeout,
                    article.url()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmRequest, LlmResponse, Summary, UsageMetadata};
    use anyhow::Result;
    use chrono::Utc;

    enum Behaviour {
        Answer,
        Fail,
        Hang,
    }

    struct FakeProvider(Behaviour);

    #[async_trait::async_trait]
    impl LlmProvider for FakeProvider {
        async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse> {
            anyhow::bail!("not used")
        }

        async fn summarize(&self, title: &str, _content: &str, _url: &str) -> Result<Summary> {
            match self.0 {
                Behaviour::Answer => Ok(Summary {
                    translated_title: format!("[zh] {}", title),
                    summary: "short summary".to_string(),
                    usage: UsageMetadata::default(),
                }),
                Behaviour::Fail => anyhow::bail!("provider down"),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    anyhow::bail!("unreachable")
                }
            }
        }

        fn model_name(&self) -> &str {
            "fake"
        }
    }

    fn article() -> Article {
        Article::new("https://example.com/a", "Bitcoin rallies", "original body", "Feed", 1, Utc::now())
    }

    #[tokio::test]
    async fn replaces_text_on_success() {
        let s = Summarizer::new(Arc::new(FakeProvider(Behaviour::Answer)), Duration::from_secs(5));
        let mut a = article();
        assert!(s.apply(&mut a).await);
        assert_eq!(a.title, "[zh] Bitcoin rallies");
        assert_eq!(a.body_excerpt, "short summary");
        assert_eq!(a.url(), "https://example.com/a");
    }

    #[tokio::test]
    async fn keeps_original_on_error() {
        let s = Summarizer::new(Arc::new(FakeProvider(Behaviour::Fail)), Duration::from_secs(5));
        let mut a = article();
        assert!(!s.apply(&mut a).await);
        assert_eq!(a.title, "Bitcoin rallies");
        assert_eq!(a.body_excerpt, "original body");
    }

    /// Accepts connections and never answers them.
    async fn silent_page() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}/article", addr)
    }

    #[tokio::test]
    async fn slow_page_scrape_counts_against_timeout() {
        let client = Client::builder().timeout(Duration::from_secs(30)).build().unwrap();
        let s = Summarizer::new(Arc::new(FakeProvider(Behaviour::Answer)), Duration::from_millis(300))
            .with_full_text(client);
        let mut a = Article::new(silent_page().await, "Bitcoin rallies", "original body", "Feed", 1, Utc::now());

        let started = std::time::Instant::now();
        assert!(!s.apply(&mut a).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(a.title, "Bitcoin rallies");
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_original_on_timeout() {
        let s = Summarizer::new(Arc::new(FakeProvider(Behaviour::Hang)), Duration::from_secs(2));
        let mut a = article();
        assert!(!s.apply(&mut a).await);
        assert_eq!(a.title, "Bitcoin rallies");
    }
}
