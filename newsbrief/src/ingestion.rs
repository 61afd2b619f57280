use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use common::{HttpConfig, SourceConfig};
use feed_rs::model::{Entry, Feed};
use reqwest::Client;
use scraper::Html;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::article::Article;

pub const TITLE_MAX_CHARS: usize = 200;
pub const BODY_MAX_CHARS: usize = 300;

/// Date layouts tried after RFC 2822 / RFC 3339 when a feed carries a non-standard timestamp.
const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%z",
];
const FALLBACK_NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

const MONTH_NAMES: &[(&str, &str)] = &[
    ("january", "Jan"),
    ("february", "Feb"),
    ("march", "Mar"),
    ("april", "Apr"),
    ("june", "Jun"),
    ("july", "Jul"),
    ("august", "Aug"),
    ("september", "Sep"),
    ("sept", "Sep"),
    ("october", "Oct"),
    ("november", "Nov"),
    ("december", "Dec"),
];

/// Build the single HTTP client shared by every outbound request of a run.
pub fn build_http_client(cfg: &HttpConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_seconds))
        .user_agent(cfg.user_agent.clone());

    if cfg.accept_invalid_certs {
        warn!("TLS certificate verification is disabled for outbound requests");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().context("failed to build reqwest client")
}

/// Knobs of the normalizer that do not depend on the source.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub max_entries: usize,
    pub max_retries: u32,
}

/// Fetches a feed body, retrying network errors, 5xx and 429 with exponential backoff.
pub async fn fetch_feed_bytes(client: &Client, url: &str, max_retries: u32) -> Result<Vec<u8>> {
    let max_retries = max_retries.max(1);
    let mut last_error = None;

    for attempt in 1..=max_retries {
        if attempt > 1 {
            let backoff = Duration::from_secs(2u64.pow(attempt - 2)); // 1s, 2s, 4s...
            info!("Retrying feed fetch for {} (attempt {}/{}) after {:?}...", url, attempt, max_retries, backoff);
            tokio::time::sleep(backoff).await;
        }

        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let bytes = response.bytes().await.context("failed to read response body")?;
                    return Ok(bytes.to_vec());
                } else if status.is_server_error() {
                    last_error = Some(anyhow::anyhow!("server error: {}", status));
                } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    last_error = Some(anyhow::anyhow!("rate limited: {}", status));
                } else {
                    // 4xx other than 429 will not get better by asking again
                    return Err(anyhow::anyhow!("feed fetch failed with status: {}", status));
                }
            }
            Err(e) => {
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
}

/// Parses an RSS/Atom document. Every timestamp in it goes through [`parse_timestamp`].
pub fn parse_feed(bytes: &[u8]) -> Result<Feed> {
    feed_rs::parser::Builder::new()
        .timestamp_parser(parse_timestamp)
        .build()
        .parse(bytes)
        .context("failed to parse feed")
}

/// Lenient timestamp parsing: RFC 2822, RFC 3339, RFC 2822 after repairing the usual
/// feed mistakes, then a few layouts seen in the wild. Values without an offset are
/// taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(&repair_rfc2822(text)) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in FALLBACK_DATE_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in FALLBACK_NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

/// Drops the weekday (often wrong or spelled out), shortens month names, maps `UTC`
/// and `-0000` to `+0000` and pads single-digit hours.
fn repair_rfc2822(text: &str) -> String {
    let rest = match text.split_once(',') {
        Some((weekday, rest)) if weekday.trim().chars().all(|c| c.is_ascii_alphabetic()) => rest,
        _ => text,
    };

    rest.split_whitespace()
        .map(|token| {
            if let Some((_, short)) = MONTH_NAMES.iter().find(|(long, _)| token.eq_ignore_ascii_case(long)) {
                return short.to_string();
            }
            match token {
                "UTC" | "utc" | "Z" | "-0000" => return "+0000".to_string(),
                _ => {}
            }
            match token.split_once(':') {
                Some((hour, minutes)) if hour.len() == 1 && hour.chars().all(|c| c.is_ascii_digit()) => {
                    format!("0{}:{}", hour, minutes)
                }
                _ => token.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strips markup, collapses whitespace and caps the result at `max_chars` characters.
pub fn clean_text(text: &str, max_chars: usize) -> String {
    if text.is_empty() {
        return String::new();
    }

    let fragment = Html::parse_fragment(text);
    let plain = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    let collapsed = plain.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars)
}

/// Caps already clean text at `max_chars` characters, marking the cut with "...".
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated.trim_end())
    } else {
        text.to_string()
    }
}

/// Picks the entry timestamp: published, then updated, then `now`.
fn entry_timestamp(entry: &Entry, now: DateTime<Utc>) -> DateTime<Utc> {
    entry.published.or(entry.updated).unwrap_or(now)
}

/// Turns parsed feed entries into articles published strictly after `cutoff`.
pub fn normalize_entries(
    feed: Feed,
    source: &SourceConfig,
    cutoff: DateTime<Utc>,
    max_entries: usize,
    now: DateTime<Utc>,
) -> Vec<Article> {
    let mut articles = Vec::new();

    for entry in feed.entries.into_iter().take(max_entries) {
        let published_at = entry_timestamp(&entry, now);
        if published_at <= cutoff {
            continue;
        }

        let Some(url) = entry.links.first().map(|l| l.href.trim().to_string()).filter(|u| !u.is_empty()) else {
            debug!(source = %source.name, "Skipping entry without link: {:?}", entry.title.as_ref().map(|t| &t.content));
            continue;
        };

        let raw_title = entry.title.as_ref().map(|t| t.content.as_str()).unwrap_or_default();
        let raw_body = entry
            .summary
            .as_ref()
            .map(|s| s.content.clone())
            .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
            .unwrap_or_default();

        let body = clean_text(&raw_body, usize::MAX);
        articles.push(
            Article::new(
                url,
                clean_text(raw_title, TITLE_MAX_CHARS),
                truncate_chars(&body, BODY_MAX_CHARS),
                source.name.clone(),
                source.priority,
                published_at,
            )
            .with_body(body),
        );
    }

    articles
}

/// Fetches and normalizes one source. Never fails: any error is logged and the
/// source contributes nothing.
pub async fn fetch_source(
    client: &Client,
    source: &SourceConfig,
    cutoff: DateTime<Utc>,
    opts: NormalizeOptions,
) -> Vec<Article> {
    if !source.enabled {
        debug!(source = %source.name, "Feed disabled, skipping");
        return Vec::new();
    }

    info!(source = %source.name, "Fetching feed");
    let bytes = match fetch_feed_bytes(client, &source.url, opts.max_retries).await {
        Ok(b) => b,
        Err(e) => {
            warn!(source = %source.name, "Error fetching feed: {:#}", e);
            return Vec::new();
        }
    };

    let feed = match parse_feed(&bytes) {
        Ok(f) => f,
        Err(e) => {
            warn!(source = %source.name, "Malformed feed document: {:#}", e);
            return Vec::new();
        }
    };

    let articles = normalize_entries(feed, source, cutoff, opts.max_entries, Utc::now());
    info!(source = %source.name, "Found {} fresh entries", articles.len());
    articles
}
