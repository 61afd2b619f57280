use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::article::Article;
use crate::price::PriceSnapshot;

pub mod telegram;

pub const DIGEST_TITLE: &str = "📰 *Crypto News Briefing*";
pub const NO_ARTICLES_MESSAGE: &str = "📰 *Crypto News Briefing*\n\nNo new articles found in this cycle.";
const RULE_WIDTH: usize = 30;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("chat API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("chat API rejected the message: {0}")]
    Rejected(String),
}

/// Outbound chat channel. One call sends one message.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), SendError>;
}

/// Escapes characters with meaning in Telegram legacy Markdown.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '[' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Formats `1234567.8` as `1,234,568`.
fn group_thousands(value: f64) -> String {
    let rounded = value.round().abs() as u64;
    let digits = rounded.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if value < 0.0 && rounded > 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

pub fn price_line(snapshot: &PriceSnapshot) -> String {
    let arrow = if snapshot.change_24h >= 0.0 { "📈" } else { "📉" };
    format!(
        "₿ ${} {} {:+.2}%",
        group_thousands(snapshot.price),
        arrow,
        snapshot.change_24h
    )
}

/// Renders digests in a fixed display timezone.
#[derive(Debug, Clone)]
pub struct DigestFormatter {
    offset: FixedOffset,
    offset_label: String,
}

impl DigestFormatter {
    /// Out-of-range offsets fall back to UTC.
    pub fn new(utc_offset_hours: i32) -> Self {
        match FixedOffset::east_opt(utc_offset_hours * 3600) {
            Some(offset) => Self {
                offset,
                offset_label: if utc_offset_hours == 0 {
                    "UTC".to_string()
                } else {
                    format!("UTC{:+}", utc_offset_hours)
                },
            },
            None => {
                warn!("Invalid display UTC offset {}h, using UTC", utc_offset_hours);
                Self::new(0)
            }
        }
    }

    /// Renders the digest. Articles appear in the order given.
    pub fn format(&self, articles: &[Article], price: Option<&PriceSnapshot>, now: DateTime<Utc>) -> String {
        if articles.is_empty() {
            return NO_ARTICLES_MESSAGE.to_string();
        }

        let rule = "─".repeat(RULE_WIDTH);
        let mut lines: Vec<String> = vec![
            DIGEST_TITLE.to_string(),
            format!(
                "_{} {}_",
                now.with_timezone(&self.offset).format("%Y-%m-%d %H:%M"),
                self.offset_label
            ),
            String::new(),
        ];

        if let Some(snapshot) = price {
            lines.push(price_line(snapshot));
            lines.push(String::new());
        }

        lines.push(format!("📊 Found {} crypto articles", articles.len()));
        lines.push(String::new());
        lines.push(rule.clone());
        lines.push(String::new());

        for (i, article) in articles.iter().enumerate() {
            lines.push(format!("📰 *{}. {}*", i + 1, escape_markdown(&article.title)));
            lines.push(String::new());

            let mut meta = vec![
                format!("📍 {}", escape_markdown(article.source_name())),
                format!("🕐 {}", article.published_at().with_timezone(&self.offset).format("%H:%M")),
            ];
            if article.engagement() > 0 {
                meta.push(format!("❤️ {}", article.engagement()));
            }
            lines.push(format!("   {}", meta.join(" • ")));
            lines.push(String::new());

            if !article.body_excerpt.is_empty() {
                lines.push(format!("   📝 {}", escape_markdown(&article.body_excerpt)));
                lines.push(String::new());
            }

            lines.push(format!("   🔗 [Read more]({})", article.url()));
            lines.push(String::new());
            lines.push(rule.clone());
            lines.push(String::new());
        }

        lines.push("🤖 *Automated Crypto News Briefing*".to_string());
        lines.join("\n")
    }
}

fn hard_split(line: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    chars.chunks(max_chars).map(|c| c.iter().collect()).collect()
}

/// Splits `text` into chunks of at most `max_chars` characters along line boundaries.
///
/// Joining the chunks with `\n` gives back `text`, unless a single line is longer than
/// `max_chars`: such a line is cut into pieces on character boundaries.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let mut current_lines = 0usize;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let pieces = if line_len > max_chars {
            hard_split(line, max_chars)
        } else {
            vec![line.to_string()]
        };

        for piece in pieces {
            let piece_len = piece.chars().count();
            if current_lines > 0 && current_len + 1 + piece_len > max_chars {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
                current_lines = 0;
            }
            if current_lines > 0 {
                current.push('\n');
                current_len += 1;
            }
            current.push_str(&piece);
            current_len += piece_len;
            current_lines += 1;
        }
    }

    if current_lines > 0 {
        chunks.push(current);
    }
    chunks
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Sleep before retry `n` is `delay * n`
    pub delay: Duration,
}

/// Sends a digest as ordered chunks, each retried with linear backoff.
pub struct DigestSender {
    transport: Arc<dyn ChatTransport>,
    max_chars: usize,
    retry: RetryPolicy,
}

impl DigestSender {
    pub fn new(transport: Arc<dyn ChatTransport>, max_chars: usize, retry: RetryPolicy) -> Self {
        Self {
            transport,
            max_chars,
            retry,
        }
    }

    async fn send_with_retry(&self, chunk: &str) -> bool {
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match self.transport.send_text(chunk).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!("Send attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay * attempt).await;
                    }
                }
            }
        }
        error!("Failed to send message after {} attempts", attempts);
        false
    }

    /// Delivers `text`. Stops at the first chunk that exhausts its retries.
    pub async fn send(&self, text: &str) -> bool {
        let chunks = split_message(text, self.max_chars);
        if chunks.len() > 1 {
            info!("Message too long ({} chars), sending {} chunks", text.chars().count(), chunks.len());
        }

        for (i, chunk) in chunks.iter().enumerate() {
            if !self.send_with_retry(chunk).await {
                error!("Chunk {}/{} not delivered, aborting remaining chunks", i + 1, chunks.len());
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Fails the first `failures` calls, then succeeds. Records every text it was given.
    struct FlakyTransport {
        failures: Mutex<u32>,
        sent: Mutex<Vec<String>>,
        calls: Mutex<u32>,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                sent: Mutex::new(Vec::new()),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for FlakyTransport {
        async fn send_text(&self, text: &str) -> Result<(), SendError> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SendError::Network("connection reset".into()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn split_exactly_one_over_is_lossless() {
        let max = 50;
        let mut text = vec!["x".repeat(9); 5].join("\n");
        text.push_str("\nz");
        assert_eq!(text.chars().count(), max + 1);

        let chunks = split_message(&text, max);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= max));
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello\nworld", 100), vec!["hello\nworld".to_string()]);
    }

    #[test]
    fn blank_lines_survive_splitting() {
        let text = "aaaa\n\n\nbbbb\n\ncccc";
        let chunks = split_message(text, 6);
        assert!(chunks.iter().all(|c| c.chars().count() <= 6));
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn overlong_line_is_hard_split_on_chars() {
        let text = "é".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn formatting_keeps_order_and_escapes() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let articles = vec![
            Article::new("https://example.com/1", "First_story *big*", "body", "Feed", 1, now),
            Article::new("https://example.com/2", "Second", "", "Other", 1, now).with_engagement(12),
        ];
        let price = PriceSnapshot {
            price: 65432.4,
            change_24h: -1.234,
        };

        let text = DigestFormatter::new(8).format(&articles, Some(&price), now);
        assert!(text.starts_with(DIGEST_TITLE));
        assert!(text.contains("_2024-03-01 18:00 UTC+8_"));
        assert!(text.contains("₿ $65,432 📉 -1.23%"));
        assert!(text.contains("*1. First\\_story \\*big\\**"));
        assert!(text.contains("❤️ 12"));
        assert!(text.contains("🕐 18:00"));
        let first = text.find("https://example.com/1").unwrap();
        let second = text.find("https://example.com/2").unwrap();
        assert!(first < second);
    }

    #[test]
    fn empty_digest_has_fixed_message() {
        let text = DigestFormatter::new(8).format(&[], None, Utc::now());
        assert_eq!(text, NO_ARTICLES_MESSAGE);
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0.4), "0");
        assert_eq!(group_thousands(999.0), "999");
        assert_eq!(group_thousands(1000.0), "1,000");
        assert_eq!(group_thousands(1234567.8), "1,234,568");
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let transport = FlakyTransport::new(2);
        let sender = DigestSender::new(transport.clone(), 4000, policy(3));
        assert!(sender.send("hello").await);
        assert_eq!(*transport.calls.lock().unwrap(), 3);
        assert_eq!(*transport.sent.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn exhausted_chunk_stops_later_chunks() {
        let transport = FlakyTransport::new(3);
        let sender = DigestSender::new(transport.clone(), 5, policy(3));
        assert!(!sender.send("aaaa\nbbbb\ncccc").await);
        assert_eq!(*transport.calls.lock().unwrap(), 3);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chunks_are_sent_in_order() {
        let transport = FlakyTransport::new(0);
        let sender = DigestSender::new(transport.clone(), 5, policy(3));
        assert!(sender.send("aaaa\nbbbb\ncccc").await);
        assert_eq!(*transport.sent.lock().unwrap(), vec!["aaaa", "bbbb", "cccc"]);
    }
}
