//! OpenAI-compatible chat completions client
//!
//! Works against any endpoint that speaks the `/chat/completions` dialect
//! (DeepSeek, OpenAI, local proxies).

use crate::backend::{CompletionBackend, CompletionRequest, LlmError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for an OpenAI-compatible endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL, without the `/chat/completions` suffix
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com/v1".to_string(),
            api_key: None,
            model: "deepseek-chat".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Full completions endpoint
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Client for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    config: LlmConfig,
}

impl OpenAiCompatibleClient {
    /// Build a client with the configured request timeout
    ///
    /// # Errors
    /// Returns [`LlmError::NotConfigured`] if the HTTP client cannot be built
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.is_none() {
            tracing::warn!("completion client created without an API key");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::NotConfigured(e.to_string()))?;
        Ok(Self { client, config })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Request body in the chat completions format
    fn payload(&self, request: &CompletionRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut payload = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
        });
        if let Some(temperature) = request.temperature {
            payload["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = serde_json::json!(max_tokens);
        }
        payload
    }
}

/// Pull `choices[0].message.content` out of a response body
pub(crate) fn parse_completion(json: &serde_json::Value) -> Result<String, LlmError> {
    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::Parse("missing choices[0].message.content".to_string()))?
        .trim()
        .to_string();
    if content.is_empty() {
        return Err(LlmError::Empty);
    }
    Ok(content)
}

#[async_trait]
impl CompletionBackend for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let auth_header = self
            .config
            .api_key
            .as_ref()
            .map(|k| format!("Bearer {k}"))
            .ok_or_else(|| LlmError::NotConfigured("no API key configured".to_string()))?;

        let payload = self.payload(&request);
        tracing::debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            "sending completion request"
        );

        let response = self
            .client
            .post(self.config.endpoint())
            .header("Authorization", auth_header)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimited);
            }
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = parse_completion(&json)?;
        tracing::debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}
