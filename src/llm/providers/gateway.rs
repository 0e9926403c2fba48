//! Generic OpenAI-compatible gateway adapter (OpenRouter).
//!
//! The gateway fronts many hosted backends. Some of them reject parameters the
//! others accept, so the request body is shaped per model before sending.

use async_trait::async_trait;
use reqwest::Client;

use super::chat::{self, ChatRequest, ProviderPreferences};
use crate::error::LlmError;
use crate::llm::provider::{LlmProvider, NormalizedResponse, ProviderRequest};

/// Default OpenRouter API endpoint.
pub const GATEWAY_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Environment variable holding the API key.
pub const GATEWAY_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Environment variable overriding the base URL.
pub const GATEWAY_BASE_URL_ENV: &str = "OPENROUTER_BASE_URL";

/// Model-name fragments whose backends reject `response_format`.
pub const DEFAULT_NO_RESPONSE_FORMAT: &[&str] = &[":free", "perplexity/"];

/// Upstream order pinned for DeepSeek models served through the gateway.
pub const DEFAULT_DEEPSEEK_UPSTREAMS: &[&str] = &["DeepInfra"];

/// Gateway adapter for third-party hosted models.
pub struct GatewayProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
    referer: String,
    title: String,
    no_response_format: Vec<String>,
    deepseek_upstreams: Vec<String>,
}

impl GatewayProvider {
    /// Create a gateway provider with the given API key and default endpoint.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Gateway API key for authentication
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Self::with_base_url(api_key, GATEWAY_BASE_URL.to_string())
    }

    /// Create a gateway provider with a custom base URL.
    ///
    /// Useful for testing or using gateway-compatible proxies.
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: chat::build_client(chat::DEFAULT_TIMEOUT_SECS)?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: chat::DEFAULT_TIMEOUT_SECS,
            referer: "https://llm-orchestrator.local".to_string(),
            title: "llm-orchestrator".to_string(),
            no_response_format: DEFAULT_NO_RESPONSE_FORMAT
                .iter()
                .map(|s| s.to_string())
                .collect(),
            deepseek_upstreams: DEFAULT_DEEPSEEK_UPSTREAMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
    }

    /// Build from `OPENROUTER_API_KEY` and optional `OPENROUTER_BASE_URL`.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key =
            std::env::var(GATEWAY_API_KEY_ENV).map_err(|_| LlmError::MissingApiKey {
                env_var: GATEWAY_API_KEY_ENV.to_string(),
            })?;
        let base_url =
            std::env::var(GATEWAY_BASE_URL_ENV).unwrap_or_else(|_| GATEWAY_BASE_URL.to_string());
        Self::with_base_url(api_key, base_url)
    }

    /// Override the HTTP timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Result<Self, LlmError> {
        self.client = chat::build_client(timeout_secs)?;
        self.timeout_secs = timeout_secs;
        Ok(self)
    }

    /// Set the attribution headers (`HTTP-Referer`, `X-Title`).
    pub fn with_attribution(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = referer.into();
        self.title = title.into();
        self
    }

    /// Replace the list of model-name fragments that must not get `response_format`.
    pub fn with_response_format_exclusions(mut self, patterns: Vec<String>) -> Self {
        self.no_response_format = patterns;
        self
    }

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        chat::mask_api_key(&self.api_key)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the backend serving `model` accepts `response_format`.
    pub fn supports_response_format(&self, model: &str) -> bool {
        !self
            .no_response_format
            .iter()
            .any(|pattern| model.contains(pattern.as_str()))
    }

    fn build_request(&self, model: &str, request: &ProviderRequest) -> ChatRequest {
        let response_format = request
            .response_format
            .filter(|_| self.supports_response_format(model));
        if request.response_format.is_some() && response_format.is_none() {
            tracing::debug!(model = %model, "Omitting response_format unsupported by backend");
        }

        let provider = if model.contains("deepseek") && !self.deepseek_upstreams.is_empty() {
            Some(ProviderPreferences {
                order: self.deepseek_upstreams.clone(),
                allow_fallbacks: false,
            })
        } else {
            None
        };

        ChatRequest {
            model: model.to_string(),
            messages: request.messages.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format,
            provider,
        }
    }
}

#[async_trait]
impl LlmProvider for GatewayProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn generate(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<NormalizedResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(model, request);
        let headers = [
            ("HTTP-Referer", self.referer.as_str()),
            ("X-Title", self.title.as_str()),
        ];

        tracing::debug!(provider = self.name(), model = %model, "Sending gateway request");

        chat::send_chat(
            &self.client,
            &url,
            &self.api_key,
            &headers,
            &body,
            self.timeout_secs,
        )
        .await
    }
}
