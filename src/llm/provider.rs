//! Provider-agnostic request and response model.
//!
//! Every adapter accepts a [`ProviderRequest`] and returns a
//! [`NormalizedResponse`], so the orchestrator never sees vendor wire formats.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Structured-output hint sent as `response_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Plain text output.
    Text,
    /// JSON mode.
    JsonObject,
}

/// Everything an adapter needs besides the model name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Conversation messages in order.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Structured-output hint; adapters drop it where the backend rejects it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Ask search-capable providers to ground the answer with web search.
    #[serde(default)]
    pub enable_web_search: bool,
}

impl ProviderRequest {
    /// Create a request with default generation parameters.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
            response_format: None,
            enable_web_search: false,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the structured-output hint.
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Enable native web search on providers that support it.
    pub fn with_web_search(mut self) -> Self {
        self.enable_web_search = true;
        self
    }
}

/// Normalized token usage.
///
/// `completion_tokens` always includes reasoning tokens; `reasoning_tokens` is
/// the informational share of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u64,
    /// Number of tokens generated, reasoning included.
    pub completion_tokens: u64,
    /// Reasoning tokens, when the provider reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    /// Prompt tokens served from the provider's context cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit_tokens: Option<u64>,
    /// Prompt tokens that missed the provider's context cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_miss_tokens: Option<u64>,
}

impl TokenUsage {
    /// Create usage with only prompt and completion counts.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            ..Self::default()
        }
    }

    /// Total tokens (prompt + completion).
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Web-search grounding details returned by search-capable providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingSummary {
    /// Queries the provider issued.
    pub web_search_queries: Vec<String>,
    /// Number of grounding sources attached to the answer.
    pub source_count: usize,
}

/// Provider response reduced to the fields the orchestrator consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    /// Generated text (all text parts, in order).
    pub text: String,
    /// Raw finish reason as reported by the provider.
    pub finish_reason: Option<String>,
    /// Token usage, when reported.
    pub usage: Option<TokenUsage>,
    /// Grounding metadata from search-capable providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<GroundingSummary>,
}

impl NormalizedResponse {
    /// Create a response with a finish reason and no usage.
    pub fn new(text: impl Into<String>, finish_reason: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some(finish_reason.into()),
            usage: None,
            grounding: None,
        }
    }

    /// Attach usage information.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Trait for backend adapters that can generate text.
///
/// Adapters perform exactly one network call per invocation and classify
/// failures through [`LlmError::severity`]; retrying is the caller's job.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name used in logs and artifacts.
    fn name(&self) -> &str;

    /// Generate a response from `model` for the given request.
    async fn generate(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<NormalizedResponse, LlmError>;
}
