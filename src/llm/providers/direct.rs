//! Direct-vendor adapter (DeepSeek chat and reasoning models).

use async_trait::async_trait;
use reqwest::Client;

use super::chat::{self, ChatRequest};
use crate::error::LlmError;
use crate::llm::provider::{LlmProvider, NormalizedResponse, ProviderRequest};

/// Default DeepSeek API endpoint.
pub const DIRECT_BASE_URL: &str = "https://api.deepseek.com";

/// Environment variable holding the API key.
pub const DIRECT_API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

/// Environment variable overriding the base URL.
pub const DIRECT_BASE_URL_ENV: &str = "DEEPSEEK_BASE_URL";

/// Adapter for a vendor's own OpenAI-compatible chat endpoint.
///
/// Reasoning models report their chain-of-thought tokens inside
/// `completion_tokens`; they are surfaced separately only for reporting.
pub struct DirectProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
}

impl DirectProvider {
    /// Create a provider with the given API key and the default endpoint.
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Self::with_base_url(api_key, DIRECT_BASE_URL.to_string())
    }

    /// Create a provider against a custom base URL (proxies, tests).
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: chat::build_client(chat::DEFAULT_TIMEOUT_SECS)?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: chat::DEFAULT_TIMEOUT_SECS,
        })
    }

    /// Build from `DEEPSEEK_API_KEY` and optional `DEEPSEEK_BASE_URL`.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var(DIRECT_API_KEY_ENV).map_err(|_| LlmError::MissingApiKey {
            env_var: DIRECT_API_KEY_ENV.to_string(),
        })?;
        let base_url =
            std::env::var(DIRECT_BASE_URL_ENV).unwrap_or_else(|_| DIRECT_BASE_URL.to_string());
        Self::with_base_url(api_key, base_url)
    }

    /// Override the HTTP timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Result<Self, LlmError> {
        self.client = chat::build_client(timeout_secs)?;
        self.timeout_secs = timeout_secs;
        Ok(self)
    }

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        chat::mask_api_key(&self.api_key)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, model: &str, request: &ProviderRequest) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: request.messages.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.response_format,
            provider: None,
        }
    }
}

#[async_trait]
impl LlmProvider for DirectProvider {
    fn name(&self) -> &str {
        "deepseek"
    }

    async fn generate(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<NormalizedResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(model, request);

        tracing::debug!(
            provider = self.name(),
            model = %model,
            messages = body.messages.len(),
            "Sending chat completion request"
        );

        chat::send_chat(&self.client, &url, &self.api_key, &[], &body, self.timeout_secs).await
    }
}
