/*!
common/src/lib.rs

Shared configuration types and DB helper functions for newsbrief.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file, with default/override merging
- A helper to initialize an SQLite connection pool
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/articles.db")
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Dedup records older than this many days are removed by the retention sweep
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            retention_days: default_retention_days(),
        }
    }
}

/// One syndicated feed to pull from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Higher = more trusted. Saturates at 3 in ranking.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Source is already scoped to the topic; keyword classification is skipped
    #[serde(default)]
    pub crypto_only: bool,
}

/// Weights of the three ranking signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    #[serde(default = "default_source_weight")]
    pub source_weight: f64,
    #[serde(default = "default_engagement_weight")]
    pub engagement_weight: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            recency_weight: default_recency_weight(),
            source_weight: default_source_weight(),
            engagement_weight: default_engagement_weight(),
        }
    }
}

/// Pipeline behaviour: lookback window, limits, keyword lists and ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_hours_lookback")]
    pub hours_lookback: i64,
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
    #[serde(default = "default_true")]
    pub deduplication: bool,
    #[serde(default = "default_crypto_keywords")]
    pub crypto_keywords: Vec<String>,
    #[serde(default = "default_exclude_keywords")]
    pub exclude_keywords: Vec<String>,
    /// Keywords worth 3 points each
    #[serde(default = "default_core_keywords")]
    pub core_keywords: Vec<String>,
    /// Keywords worth 2 points each; everything else in `crypto_keywords` is worth 1
    #[serde(default = "default_general_keywords")]
    pub general_keywords: Vec<String>,
    #[serde(default = "default_threshold")]
    pub exclude_threshold: u32,
    #[serde(default = "default_threshold")]
    pub relevance_threshold: u32,
    #[serde(default = "default_max_entries_per_feed")]
    pub max_entries_per_feed: usize,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Overall deadline of one run; unfinished sources are abandoned when it expires
    #[serde(default = "default_run_timeout_seconds")]
    pub run_timeout_seconds: u64,
    /// Offset used when rendering timestamps in the digest (8 = Beijing time)
    #[serde(default = "default_display_utc_offset_hours")]
    pub display_utc_offset_hours: i32,
    #[serde(default)]
    pub ranking: RankingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hours_lookback: default_hours_lookback(),
            max_articles: default_max_articles(),
            deduplication: true,
            crypto_keywords: default_crypto_keywords(),
            exclude_keywords: default_exclude_keywords(),
            core_keywords: default_core_keywords(),
            general_keywords: default_general_keywords(),
            exclude_threshold: default_threshold(),
            relevance_threshold: default_threshold(),
            max_entries_per_feed: default_max_entries_per_feed(),
            fetch_concurrency: default_fetch_concurrency(),
            run_timeout_seconds: default_run_timeout_seconds(),
            display_utc_offset_hours: default_display_utc_offset_hours(),
            ranking: RankingConfig::default(),
        }
    }
}

/// Outbound HTTP client settings shared by feed fetching, scraping and price lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Skip TLS certificate verification. Only meant for broken corporate proxies.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout_seconds(),
            user_agent: default_user_agent(),
            accept_invalid_certs: false,
            max_retries: default_fetch_retries(),
        }
    }
}

/// Telegram delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    /// Name of the environment variable holding the bot token
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,
    pub chat_id: Option<String>,
    /// Environment variable consulted when `chat_id` is not set
    #[serde(default = "default_chat_id_env")]
    pub chat_id_env: String,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,
    #[serde(default = "default_true")]
    pub disable_link_preview: bool,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_telegram_api_base(),
            bot_token_env: default_bot_token_env(),
            chat_id: None,
            chat_id_env: default_chat_id_env(),
            max_message_length: default_max_message_length(),
            parse_mode: default_parse_mode(),
            disable_link_preview: true,
            retry_attempts: default_retry_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

/// Remote LLM config for title translation and summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    /// Output language for the translated title and summary (e.g. "Chinese")
    pub language: Option<String>,
    /// Download the article page and summarize its text instead of the feed excerpt
    #[serde(default)]
    pub fetch_full_text: bool,
}

/// Optional market price line shown in the digest header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_price_url")]
    pub url: String,
    #[serde(default = "default_price_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub telegram: Option<TelegramConfig>,
    pub llm: Option<LlmConfig>,
    pub price: Option<PriceConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        for source in &self.sources {
            let parsed = url::Url::parse(&source.url)
                .with_context(|| format!("source '{}' has an invalid url: {}", source.name, source.url))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("source '{}' must use http or https, got {}", source.name, parsed.scheme());
            }
        }

        let r = &self.pipeline.ranking;
        if r.recency_weight < 0.0 || r.source_weight < 0.0 || r.engagement_weight < 0.0 {
            anyhow::bail!("ranking weights must be non-negative");
        }
        if self.pipeline.fetch_concurrency == 0 {
            anyhow::bail!("pipeline.fetch_concurrency must be at least 1");
        }
        if let Some(tg) = &self.telegram {
            if tg.max_message_length == 0 {
                anyhow::bail!("telegram.max_message_length must be positive");
            }
            if tg.retry_attempts == 0 {
                anyhow::bail!("telegram.retry_attempts must be at least 1");
            }
        }
        Ok(())
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and returns a WAL-mode `SqlitePool`.
/// Schema creation is left to the caller (see `newsbrief::storage::DedupStore`).
///
/// Example:
///   let pool = init_db_pool("data/articles.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

fn default_true() -> bool {
    true
}
fn default_db_path() -> String {
    "data/articles.db".to_string()
}
fn default_retention_days() -> u32 {
    7
}
fn default_priority() -> u32 {
    1
}
fn default_recency_weight() -> f64 {
    0.4
}
fn default_source_weight() -> f64 {
    0.3
}
fn default_engagement_weight() -> f64 {
    0.3
}
fn default_hours_lookback() -> i64 {
    24
}
fn default_max_articles() -> usize {
    15
}
fn default_threshold() -> u32 {
    2
}
fn default_max_entries_per_feed() -> usize {
    50
}
fn default_fetch_concurrency() -> usize {
    5
}
fn default_run_timeout_seconds() -> u64 {
    300
}
fn default_display_utc_offset_hours() -> i32 {
    8
}
fn default_http_timeout_seconds() -> u64 {
    30
}
fn default_user_agent() -> String {
    "newsbrief/0.1.0".to_string()
}
fn default_fetch_retries() -> u32 {
    3
}
fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}
fn default_chat_id_env() -> String {
    "TELEGRAM_CHAT_ID".to_string()
}
fn default_max_message_length() -> usize {
    4000
}
fn default_parse_mode() -> String {
    "Markdown".to_string()
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_seconds() -> u64 {
    5
}
fn default_price_url() -> String {
    "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd&include_24hr_change=true"
        .to_string()
}
fn default_price_timeout_seconds() -> u64 {
    10
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
fn default_crypto_keywords() -> Vec<String> {
    strings(&[
        "bitcoin", "btc", "ethereum", "crypto", "cryptocurrency", "blockchain", "stablecoin",
        "defi", "nft", "altcoin", "web3", "solana", "binance", "coinbase", "token", "mining",
    ])
}
fn default_exclude_keywords() -> Vec<String> {
    strings(&[
        "stock", "shares", "nasdaq", "dow jones", "s&p 500", "earnings", "dividend", "ipo",
    ])
}
fn default_core_keywords() -> Vec<String> {
    strings(&["bitcoin", "ethereum", "btc", "eth"])
}
fn default_general_keywords() -> Vec<String> {
    strings(&["crypto", "cryptocurrency", "blockchain"])
}
