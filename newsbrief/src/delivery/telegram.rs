use anyhow::{Context, Result};
use common::TelegramConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatTransport, SendError};

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API `sendMessage` transport.
pub struct TelegramTransport {
    client: Client,
    endpoint: String,
    chat_id: String,
    parse_mode: String,
    disable_link_preview: bool,
}

impl TelegramTransport {
    pub fn new(client: Client, cfg: &TelegramConfig, token: &str, chat_id: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: format!("{}/bot{}/sendMessage", cfg.api_base.trim_end_matches('/'), token),
            chat_id: chat_id.into(),
            parse_mode: cfg.parse_mode.clone(),
            disable_link_preview: cfg.disable_link_preview,
        }
    }

    /// Reads the bot token and chat id from the environment variables named in the config.
    /// An explicit `chat_id` in the config wins over the environment.
    pub fn from_env(client: Client, cfg: &TelegramConfig) -> Result<Self> {
        let token = std::env::var(&cfg.bot_token_env)
            .with_context(|| format!("Telegram bot token env var '{}' not set", cfg.bot_token_env))?;
        let chat_id = match &cfg.chat_id {
            Some(id) => id.clone(),
            None => std::env::var(&cfg.chat_id_env)
                .with_context(|| format!("Telegram chat id env var '{}' not set", cfg.chat_id_env))?,
        };
        Ok(Self::new(client, cfg, &token, chat_id))
    }
}

#[async_trait::async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, text: &str) -> Result<(), SendError> {
        let body = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            parse_mode: &self.parse_mode,
            disable_web_page_preview: self.disable_link_preview,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Network(e.without_url().to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SendError::Network(e.without_url().to_string()))?;

        if status != reqwest::StatusCode::OK {
            return Err(SendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        match serde_json::from_str::<ApiResponse>(&text) {
            Ok(api) if api.ok => Ok(()),
            Ok(api) => Err(SendError::Rejected(
                api.description.unwrap_or_else(|| "ok=false".to_string()),
            )),
            Err(e) => Err(SendError::Rejected(format!("unreadable response: {}", e))),
        }
    }
}
