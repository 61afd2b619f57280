use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, Summary, UsageMetadata};

/// Article text beyond this many characters is not sent to the model.
const MAX_PROMPT_CONTENT_CHARS: usize = 2000;

/// Remote LLM provider using OpenAI-compatible HTTP API
pub struct RemoteLlmProvider {
    base_url: String,
    api_key: String,
    model: String,
    language: String,
    default_timeout: Duration,
    default_max_tokens: usize,
    default_temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            language: "Chinese".to_string(),
            default_timeout: Duration::from_secs(30),
            default_max_tokens: 300,
            default_temperature: 0.3,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(mut self, timeout_secs: u64, max_tokens: usize, temperature: f32) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }

    /// Target language of translated titles and summaries
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Reuse an already configured client (proxy, TLS, user agent)
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn summary_prompt(&self, title: &str, content: &str, url: &str) -> String {
        let content: String = content.chars().take(MAX_PROMPT_CONTENT_CHARS).collect();
        let task = if content.trim().is_empty() {
            "2. Write a summary of at most 100 characters based on the title alone."
        } else {
            "2. Read the article and summarize it in at most 100 characters, keeping only what is directly relevant to crypto assets and markets."
        };

        format!(
            r#"You are a crypto news editor. Answer in {language}.

1. Translate the title into concise {language} (at most 25 characters).
{task}

OUTPUT FORMAT (strict JSON):
{{
  "translated_title": "...",
  "summary": "..."
}}

TITLE: {title}
URL: {url}

ARTICLE:
{content}
"#,
            language = self.language,
        )
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let max_tokens = request.max_tokens.unwrap_or(self.default_max_tokens);
        let temperature = request.temperature.unwrap_or(self.default_temperature);

        let req_body = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt,
            }],
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
        };

        let response = tokio::time::timeout(
            timeout,
            self.client
                .post(&self.base_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send(),
        )
        .await
        .context("LLM request timed out")?
        .context("LLM HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {}: {}", status, body);
        }

        let resp_body: OpenAiResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let choice = resp_body
            .choices
            .first()
            .context("LLM response has no choices")?;

        let usage = resp_body
            .usage
            .map(|u| UsageMetadata {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: choice.message.content.clone(),
            usage,
            model: resp_body.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    async fn summarize(&self, title: &str, content: &str, url: &str) -> Result<Summary> {
        let request = LlmRequest {
            prompt: self.summary_prompt(title, content, url),
            max_tokens: None,
            temperature: None,
            timeout_seconds: None,
        };

        let response = self.generate(request).await?;

        let cleaned_json = super::extract_json_from_text(&response.content)
            .context("No valid JSON found in LLM summary response")?;

        let data: SummaryJson = serde_json::from_str(&cleaned_json)
            .with_context(|| format!("Failed to parse LLM summary as JSON. Input was: {}", cleaned_json))?;

        if data.translated_title.trim().is_empty() {
            anyhow::bail!("LLM returned an empty title");
        }

        Ok(Summary {
            translated_title: data.translated_title.trim().to_string(),
            summary: data.summary.trim().to_string(),
            usage: response.usage,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SummaryJson {
    translated_title: String,
    #[serde(default)]
    summary: String,
}
