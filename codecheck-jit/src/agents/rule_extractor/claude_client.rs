//! Anthropic Messages API client
//!
//! One shared client serves every running load, so the per-minute request
//! quota is process-wide.

use async_trait::async_trait;
use codecheck_common::config::AiConfig;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde_json::json;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::agents::ExtractionError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Text completion backend used by the AI extractor
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// False when the provider cannot make requests (no credential)
    fn is_configured(&self) -> bool;

    async fn complete(&self, prompt: &str) -> Result<String, ExtractionError>;
}

pub struct ClaudeClient {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
    max_tokens: u32,
    temperature: f32,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ClaudeClient {
    /// Build from `[ai]` settings with an already-resolved API key
    ///
    /// `timeout` bounds each HTTP request.
    pub fn new(config: &AiConfig, api_key: Option<String>, timeout: Duration) -> Result<Self, ExtractionError> {
        let per_minute = NonZeroU32::new(config.requests_per_minute)
            .ok_or_else(|| ExtractionError::NotConfigured("requests_per_minute must be at least 1".to_string()))?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: config.model.clone(),
            endpoint: format!("{}/v1/messages", config.base_url.trim_end_matches('/')),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            rate_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        })
    }
}

#[async_trait]
impl CompletionProvider for ClaudeClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, prompt: &str) -> Result<String, ExtractionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ExtractionError::NotConfigured("no AI API key".to_string()))?;

        self.rate_limiter.until_ready().await;

        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        tracing::debug!(endpoint = %self.endpoint, model = %self.model, "Claude completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value = response.json().await?;
        payload["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExtractionError::Parse("missing content[0].text".to_string()))
    }
}
