/*
newsbrief - single-binary main.rs
Runs one news cycle (fetch, filter, dedup, rank, deliver) or the retention sweep, then exits.
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{init_db_pool, Config};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use newsbrief::delivery::telegram::TelegramTransport;
use newsbrief::delivery::{DigestSender, RetryPolicy};
use newsbrief::ingestion::build_http_client;
use newsbrief::llm::remote::RemoteLlmProvider;
use newsbrief::llm::summarizer::Summarizer;
use newsbrief::llm::LlmProvider;
use newsbrief::pipeline::{self, Pipeline};
use newsbrief::storage::DedupStore;

#[derive(Parser, Debug)]
#[command(name = "newsbrief", about = "Crypto news digest for Telegram")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Build the digest and log it instead of sending it
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete dedup records older than the configured retention
    Purge {
        /// Override `database.retention_days`
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    let config = match Config::load_with_defaults(
        Some(default_path.as_path()).filter(|p| p.exists()),
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, sources = config.sources.len(), "configuration loaded");

    let db_pool = match init_db_pool(&config.database.path).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %config.database.path, "failed to initialize database pool");
            return Err(e);
        }
    };
    let store = DedupStore::open(db_pool).await?;

    if let Some(Command::Purge { days }) = args.command {
        let days = days.unwrap_or(config.database.retention_days);
        let removed = pipeline::purge(&store, days).await?;
        info!(removed, days, "retention sweep finished");
        return Ok(());
    }

    let client = build_http_client(&config.http)?;
    let mut pipeline = Pipeline::new(&config, client.clone(), store);

    if let Some(llm_config) = &config.llm {
        match create_llm_provider(llm_config, client.clone()) {
            Ok(provider) => {
                info!("LLM provider initialized: {}", provider.model_name());
                let timeout = Duration::from_secs(llm_config.timeout_seconds.unwrap_or(30));
                let mut summarizer = Summarizer::new(provider, timeout);
                if llm_config.fetch_full_text {
                    summarizer = summarizer.with_full_text(client.clone());
                }
                pipeline = pipeline.with_summarizer(summarizer);
            }
            Err(e) => warn!("LLM disabled: {:#}", e),
        }
    }

    if !args.dry_run {
        match &config.telegram {
            Some(tg) => match TelegramTransport::from_env(client.clone(), tg) {
                Ok(transport) => {
                    let retry = RetryPolicy {
                        attempts: tg.retry_attempts,
                        delay: Duration::from_secs(tg.retry_delay_seconds),
                    };
                    pipeline = pipeline.with_sender(DigestSender::new(
                        Arc::new(transport),
                        tg.max_message_length,
                        retry,
                    ));
                }
                Err(e) => error!("Telegram delivery unavailable: {:#}", e),
            },
            None => warn!("no [telegram] section configured, digest will not be sent"),
        }
    }

    let report = pipeline.run_once(args.dry_run).await;
    if !report.sent && !args.dry_run {
        // not fatal: the articles were not recorded and the next cycle retries them
        warn!(?report, "cycle finished without delivering a digest");
    }
    Ok(())
}

fn create_llm_provider(llm_config: &common::LlmConfig, client: reqwest::Client) -> Result<Arc<dyn LlmProvider>> {
    let api_key_env = llm_config
        .api_key_env
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("Missing api_key_env in llm config"))?;

    let api_key = std::env::var(api_key_env)
        .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;

    let model = llm_config.model.clone().unwrap_or_else(|| "deepseek-chat".to_string());
    let api_url = llm_config
        .api_url
        .clone()
        .unwrap_or_else(|| "https://api.deepseek.com/chat/completions".to_string());
    let timeout_secs = llm_config.timeout_seconds.unwrap_or(30);
    let max_tokens = llm_config.max_tokens.unwrap_or(300);

    let mut provider = RemoteLlmProvider::new(api_url, api_key, model)
        .with_defaults(timeout_secs, max_tokens, 0.3)
        .with_client(client);
    if let Some(language) = &llm_config.language {
        provider = provider.with_language(language.clone());
    }
    Ok(Arc::new(provider))
}
