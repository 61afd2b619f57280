use anyhow::{Context, Result};
use reqwest::Client;
use std::io::Cursor;
use tracing::{debug, warn};

/// Scraped text beyond this length is dropped before it reaches the summarizer.
pub const MAX_SCRAPED_CHARS: usize = 3000;

/// Fetches an article page and extracts its main text with readability.
/// An extraction failure yields an empty string; only transport errors are returned.
pub async fn scrape_article_content(client: &Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await.context("failed to fetch article page")?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow::anyhow!("article fetch failed with status: {}", status));
    }

    // readability wants a reader
    let bytes = response.bytes().await.context("failed to read response body")?;
    let mut reader = Cursor::new(bytes);

    let url_obj = url::Url::parse(url).context("failed to parse article URL")?;

    let text = match readability::extractor::extract(&mut reader, &url_obj) {
        Ok(product) => match html2text::from_read(product.content.as_bytes(), 100) {
            Ok(plain) => plain,
            Err(e) => {
                warn!("scraping: failed to convert extracted HTML to text: {}", e);
                product.text
            }
        },
        Err(e) => {
            warn!("scraping: readability failed for {}: {}", url, e);
            return Ok(String::new());
        }
    };

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(MAX_SCRAPED_CHARS).collect();
    debug!("scraping: extracted {} chars from {}", capped.chars().count(), url);
    Ok(capped)
}
