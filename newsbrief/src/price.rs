use anyhow::{Context, Result};
use common::PriceConfig;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// BTC quote shown in the digest header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSnapshot {
    pub price: f64,
    pub change_24h: f64,
}

#[derive(Debug, Deserialize)]
struct CoinQuote {
    usd: f64,
    #[serde(default)]
    usd_24h_change: Option<f64>,
}

/// Parses a CoinGecko `simple/price` payload for bitcoin.
pub fn parse_quote(body: &str) -> Result<PriceSnapshot> {
    let quotes: HashMap<String, CoinQuote> =
        serde_json::from_str(body).context("unexpected price payload")?;
    let btc = quotes.get("bitcoin").context("price payload has no bitcoin quote")?;
    Ok(PriceSnapshot {
        price: btc.usd,
        change_24h: btc.usd_24h_change.unwrap_or(0.0),
    })
}

async fn fetch_quote(client: &Client, cfg: &PriceConfig) -> Result<PriceSnapshot> {
    let response = client
        .get(&cfg.url)
        .header("accept", "application/json")
        .timeout(Duration::from_secs(cfg.timeout_seconds))
        .send()
        .await
        .context("price request failed")?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("price API returned status {}", status);
    }

    let body = response.text().await.context("failed to read price response")?;
    parse_quote(&body)
}

/// Optional collaborator: any failure just means the digest has no price line.
pub async fn fetch_btc_price(client: &Client, cfg: &PriceConfig) -> Option<PriceSnapshot> {
    if !cfg.enabled {
        return None;
    }
    match fetch_quote(client, cfg).await {
        Ok(snapshot) => {
            info!("BTC: ${:.0} ({:+.2}%)", snapshot.price, snapshot.change_24h);
            Some(snapshot)
        }
        Err(e) => {
            warn!("Failed to fetch BTC price: {:#}", e);
            None
        }
    }
}
