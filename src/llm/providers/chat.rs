//! OpenAI-compatible chat-completions wire format.
//!
//! Shared by the direct-vendor and gateway adapters, which differ only in
//! endpoint, credentials and which optional parameters they send.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::provider::{Message, NormalizedResponse, ResponseFormat, TokenUsage};

/// Default per-request HTTP timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Build an HTTP client with the given request timeout.
pub fn build_client(timeout_secs: u64) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::RequestFailed(format!("Failed to build HTTP client: {}", e)))
}

/// Mask an API key for diagnostics.
pub fn mask_api_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// Gateway routing preferences (`provider` field).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderPreferences {
    pub order: Vec<String>,
    pub allow_fallbacks: bool,
}

/// Request body for `POST {base}/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderPreferences>,
}

/// Response body from a chat-completions endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Usage block; the cache fields are vendor extensions and usually absent.
#[derive(Debug, Default, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub prompt_cache_hit_tokens: Option<u64>,
    #[serde(default)]
    pub prompt_cache_miss_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletionTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: Option<u64>,
}

impl From<ChatUsage> for TokenUsage {
    fn from(usage: ChatUsage) -> Self {
        TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            // Reasoning tokens are already part of completion_tokens here.
            completion_tokens: usage.completion_tokens,
            reasoning_tokens: usage
                .completion_tokens_details
                .and_then(|details| details.reasoning_tokens),
            cache_hit_tokens: usage.prompt_cache_hit_tokens,
            cache_miss_tokens: usage.prompt_cache_miss_tokens,
        }
    }
}

impl ChatResponse {
    /// Reduce the first choice to a [`NormalizedResponse`].
    pub fn normalize(self) -> Result<NormalizedResponse, LlmError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;

        Ok(NormalizedResponse {
            text: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: self.usage.map(TokenUsage::from),
            grounding: None,
        })
    }
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Error detail from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Extract a readable message from an error body, falling back to the raw text.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorResponse>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.to_string())
}

/// Send one chat-completions request and normalize the result.
///
/// # Arguments
///
/// * `client` - HTTP client (carries the request timeout)
/// * `url` - Full endpoint URL
/// * `api_key` - Bearer token
/// * `extra_headers` - Additional headers (gateway attribution)
/// * `body` - Request body
/// * `timeout_secs` - Reported in [`LlmError::Timeout`] when the client times out
pub async fn send_chat(
    client: &Client,
    url: &str,
    api_key: &str,
    extra_headers: &[(&str, &str)],
    body: &ChatRequest,
    timeout_secs: u64,
) -> Result<NormalizedResponse, LlmError> {
    let mut builder = client
        .post(url)
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {}", api_key));
    for (name, value) in extra_headers {
        builder = builder.header(*name, *value);
    }

    let http_response = builder
        .json(body)
        .send()
        .await
        .map_err(|e| LlmError::from_transport(e, timeout_secs))?;

    let status = http_response.status();
    if !status.is_success() {
        let error_text = http_response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        return Err(LlmError::from_status(
            status.as_u16(),
            error_message(&error_text),
        ));
    }

    let api_response: ChatResponse = http_response
        .json()
        .await
        .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

    api_response.normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_masked_short() {
        assert_eq!(mask_api_key("abc"), "***");
    }

    #[test]
    fn test_api_key_masked_normal() {
        assert_eq!(mask_api_key("sk-1234567890abcdef"), "sk-1...cdef");
    }

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![Message::user("Hello")],
            temperature: Some(0.7),
            max_tokens: Some(1000),
            response_format: None,
            provider: None,
        };

        let json = serde_json::to_string(&request).expect("serialization should succeed");
        assert!(json.contains("\"model\":\"deepseek-chat\""));
        assert!(json.contains("\"temperature\":0.7"));
        assert!(json.contains("\"max_tokens\":1000"));
        assert!(!json.contains("response_format"));
        assert!(!json.contains("provider"));
    }

    #[test]
    fn test_normalize_reasoning_and_cache_usage() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "Hello"}, "finish_reason": "stop"}],
            "usage": {
                "prompt_tokens": 100,
                "completion_tokens": 250,
                "prompt_cache_hit_tokens": 60,
                "prompt_cache_miss_tokens": 40,
                "completion_tokens_details": {"reasoning_tokens": 200}
            }
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).expect("valid body");
        let response = parsed.normalize().expect("one choice");

        assert_eq!(response.text, "Hello");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        let usage = response.usage.expect("usage present");
        assert_eq!(usage.completion_tokens, 250);
        assert_eq!(usage.reasoning_tokens, Some(200));
        assert_eq!(usage.cache_hit_tokens, Some(60));
        assert_eq!(usage.cache_miss_tokens, Some(40));
    }

    #[test]
    fn test_normalize_without_choices_is_empty_response() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).expect("valid");
        assert!(matches!(parsed.normalize(), Err(LlmError::EmptyResponse)));
    }

    #[test]
    fn test_null_content_becomes_empty_text() {
        let body = r#"{"choices": [{"message": {"content": null}, "finish_reason": "length"}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).expect("valid");
        let response = parsed.normalize().expect("one choice");
        assert!(response.text.is_empty());
        assert!(response.usage.is_none());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error": {"message": "Invalid API key"}}"#),
            "Invalid API key"
        );
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }
}
