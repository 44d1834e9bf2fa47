//! Chat completions over any OpenAI-compatible HTTP endpoint
//!
//! Rate limits (429), server errors (5xx) and transport failures are retried
//! with exponential backoff; any other 4xx fails immediately.

use super::{Prompt, TextGenerator};
use crate::config::GenerationConfig;
use crate::error::GenerationError;
use std::time::Duration;

const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(8);

pub struct OpenAiCompatibleGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout_secs: u64,
    max_retries: u32,
    retry_base: Duration,
}

impl OpenAiCompatibleGenerator {
    /// Build a client from configuration, reading the key from `api_key_env`
    ///
    /// A missing key is allowed so local servers without auth keep working.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "{} is not set; calling {} without an API key",
                config.api_key_env,
                config.base_url
            );
        }
        Self::new(config, api_key)
    }

    pub fn new(config: &GenerationConfig, api_key: Option<String>) -> Result<Self, GenerationError> {
        if config.model.trim().is_empty() {
            return Err(GenerationError::NotConfigured(
                "generation.model must not be empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
            retry_base: DEFAULT_RETRY_BASE,
        })
    }

    /// Override the first retry delay
    pub fn with_retry_base(mut self, delay: Duration) -> Self {
        self.retry_base = delay;
        self
    }

    fn request_body(&self, prompt: &Prompt) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "temperature": 0.0,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.render_user() },
            ],
        })
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.retry_base
            .saturating_mul(1u32 << (attempt - 1).min(5))
            .min(MAX_RETRY_DELAY)
    }
}

#[async_trait::async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let body = self.request_body(prompt);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.delay(attempt)).await;
            }

            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!("Generation request attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(if e.is_timeout() {
                        GenerationError::Timeout(self.timeout_secs)
                    } else {
                        GenerationError::RequestFailed(e.to_string())
                    });
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let json: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
                return parse_completion(&json);
            }

            let body_text = response.text().await.unwrap_or_default();
            let err = GenerationError::RequestFailed(format!("HTTP {}: {}", status, body_text));
            if status.as_u16() == 429 || status.is_server_error() {
                tracing::debug!("Generation attempt {} got {}, retrying", attempt + 1, status);
                last_err = Some(err);
                continue;
            }
            return Err(err);
        }

        Err(last_err.unwrap_or_else(|| {
            GenerationError::RequestFailed("generation failed after retries".to_string())
        }))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Extract `choices[0].message.content`
fn parse_completion(json: &serde_json::Value) -> Result<String, GenerationError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            GenerationError::InvalidResponse("missing choices[0].message.content".to_string())
        })
}
