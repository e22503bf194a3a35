//! Chat-completion client abstraction and the HTTP implementation.
//!
//! Defines the [`ChatClient`] trait consumed by the batch corrector and
//! [`HttpChatClient`], which talks to any OpenAI-compatible
//! `chat/completions` endpoint. Both supported providers (`gpt`,
//! `deepseek`) use it with their own URL, model, and credential.
//!
//! # Retry Strategy
//!
//! Each request is classified into a [`CallOutcome`]:
//! - success with a `choices[0].message.content` string → done
//! - network error, timeout, any non-2xx status, malformed body → retry
//! - a request that cannot be built at all (e.g. an invalid endpoint URL)
//!   → fail immediately ([`InvokeError::Rejected`])
//!
//! Retries wait `base * 2^attempt` plus uniform jitter up to `base / 4`.
//! After `max_retries` retries the last failure surfaces as
//! [`InvokeError::Connectivity`].

use async_trait::async_trait;
use rand::Rng;
use std::time::{Duration, Instant};

use crate::config::{LlmConfig, Provider};
use crate::error::{ConfigError, InvokeError};
use crate::models::ChatMessage;

/// A remote model that turns an ordered message list into one text blob.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Provider tag used in logs (e.g. `"deepseek"`).
    fn provider_name(&self) -> &str;
    /// Model identifier sent with each request.
    fn model_name(&self) -> &str;
    /// Run one completion, retrying transient failures internally.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, InvokeError>;
}

/// Classification of a single HTTP exchange.
#[derive(Debug)]
pub enum CallOutcome {
    Success(String),
    Retryable(String),
    Fatal(String),
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max_retries: u32,
}

impl Backoff {
    /// Delay before retry number `attempt + 1` (`attempt` is zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(16));
        let jitter = rand::rng().random_range(0..=base_ms / 4);
        Duration::from_millis(exp.saturating_add(jitter))
    }
}

/// OpenAI-compatible chat-completion client.
pub struct HttpChatClient {
    provider: Provider,
    url: String,
    model: String,
    api_key: String,
    temperature: f64,
    backoff: Backoff,
    client: reqwest::Client,
}

impl HttpChatClient {
    /// Build a client for `provider`, reading its credential from the
    /// environment variable named in the provider's config table.
    pub fn new(config: &LlmConfig, provider: Provider) -> anyhow::Result<Self> {
        let endpoint = config.endpoint(provider);
        let api_key = std::env::var(&endpoint.api_key_env).map_err(|_| {
            ConfigError::MissingApiKey {
                provider: provider.to_string(),
                env: endpoint.api_key_env.clone(),
            }
        })?;
        Self::with_api_key(config, provider, api_key)
    }

    pub fn with_api_key(
        config: &LlmConfig,
        provider: Provider,
        api_key: String,
    ) -> anyhow::Result<Self> {
        let endpoint = config.endpoint(provider);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            provider,
            url: endpoint.base_url.clone(),
            model: endpoint.model.clone(),
            api_key,
            temperature: config.temperature,
            backoff: Backoff {
                base: Duration::from_millis(config.backoff_base_ms),
                max_retries: config.max_retries,
            },
            client,
        })
    }

    async fn call_once(&self, body: &serde_json::Value) -> CallOutcome {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await;

        let response = match resp {
            Ok(r) => r,
            Err(e) if e.is_builder() => return CallOutcome::Fatal(e.to_string()),
            Err(e) => return CallOutcome::Retryable(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<serde_json::Value>().await {
                Ok(json) => match extract_content(&json) {
                    Some(content) => CallOutcome::Success(content),
                    None => CallOutcome::Retryable(
                        "invalid response: missing choices[0].message.content".to_string(),
                    ),
                },
                Err(e) => CallOutcome::Retryable(format!("invalid response body: {}", e)),
            };
        }

        let body_text = response.text().await.unwrap_or_default();
        CallOutcome::Retryable(format!("API error {}: {}", status, body_text))
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    fn provider_name(&self) -> &str {
        self.provider.as_str()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, InvokeError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let total = self.backoff.max_retries + 1;
        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            match self.call_once(&body).await {
                CallOutcome::Success(content) => {
                    tracing::debug!(
                        provider = %self.provider,
                        secs = started.elapsed().as_secs_f64(),
                        "chat completion ok"
                    );
                    return Ok(content);
                }
                CallOutcome::Fatal(message) => {
                    tracing::warn!(provider = %self.provider, %message, "chat completion rejected");
                    return Err(InvokeError::Rejected {
                        provider: self.provider.to_string(),
                        message,
                    });
                }
                CallOutcome::Retryable(message) => {
                    if attempt >= self.backoff.max_retries {
                        tracing::warn!(
                            provider = %self.provider,
                            attempts = total,
                            %message,
                            "chat completion failed after all retries"
                        );
                        return Err(InvokeError::Connectivity {
                            provider: self.provider.to_string(),
                            attempts: total,
                            message,
                        });
                    }
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        provider = %self.provider,
                        attempt = attempt + 1,
                        of = total,
                        backoff_secs = delay.as_secs_f64(),
                        %message,
                        "chat completion error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn extract_content(json: &serde_json::Value) -> Option<String> {
    json.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}
