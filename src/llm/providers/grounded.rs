//! Search-grounded adapter (Gemini `generateContent`).
//!
//! Grounded answers arrive as several ordered text parts interleaved with
//! non-text parts. All text parts are concatenated; taking only the first one
//! silently truncates most of the answer.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::chat;
use crate::error::LlmError;
use crate::llm::provider::{
    GroundingSummary, LlmProvider, Message, NormalizedResponse, ProviderRequest, TokenUsage,
};

/// Default Gemini API endpoint.
pub const GROUNDED_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Environment variable holding the API key.
pub const GROUNDED_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Environment variable overriding the base URL.
pub const GROUNDED_BASE_URL_ENV: &str = "GEMINI_BASE_URL";

/// Output token ceiling used when the request does not set one.
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 65536;

const DEFAULT_TOP_P: f64 = 0.8;
const DEFAULT_TOP_K: u32 = 40;

/// Adapter for a provider with native web-search tool augmentation.
pub struct GroundedProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
}

impl GroundedProvider {
    /// Create a provider with the given API key and default endpoint.
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Self::with_base_url(api_key, GROUNDED_BASE_URL.to_string())
    }

    /// Create a provider against a custom base URL.
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: chat::build_client(chat::DEFAULT_TIMEOUT_SECS)?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: chat::DEFAULT_TIMEOUT_SECS,
        })
    }

    /// Build from `GEMINI_API_KEY` and optional `GEMINI_BASE_URL`.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key =
            std::env::var(GROUNDED_API_KEY_ENV).map_err(|_| LlmError::MissingApiKey {
                env_var: GROUNDED_API_KEY_ENV.to_string(),
            })?;
        let base_url = std::env::var(GROUNDED_BASE_URL_ENV)
            .unwrap_or_else(|_| GROUNDED_BASE_URL.to_string());
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
}

/// Convert chat messages into `contents`.
///
/// System messages have no role of their own here; they are folded into the
/// first user turn. Assistant turns use the `model` role.
fn build_contents(messages: &[Message]) -> Vec<Content> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_str())
        .collect();
    let mut pending_system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };

    let mut contents = Vec::new();
    for message in messages.iter().filter(|m| m.role != "system") {
        let (role, text) = if message.role == "assistant" {
            ("model", message.content.clone())
        } else {
            match pending_system.take() {
                Some(prefix) => ("user", format!("{}\n\n{}", prefix, message.content)),
                None => ("user", message.content.clone()),
            }
        };
        contents.push(Content {
            role: role.to_string(),
            parts: vec![Part {
                text: Some(text),
                thought: None,
            }],
        });
    }

    // System prompt without any user turn still has to be sent.
    if let Some(prefix) = pending_system {
        contents.insert(
            0,
            Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: Some(prefix),
                    thought: None,
                }],
            },
        );
    }

    contents
}

fn build_request(request: &ProviderRequest) -> GenerateRequest {
    GenerateRequest {
        contents: build_contents(&request.messages),
        tools: if request.enable_web_search {
            Some(vec![Tool {
                google_search: EmptyObject {},
            }])
        } else {
            None
        },
        generation_config: GenerationConfig {
            max_output_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            temperature: request.temperature,
            top_p: DEFAULT_TOP_P,
            top_k: DEFAULT_TOP_K,
        },
    }
}

impl GenerateResponse {
    fn normalize(self) -> Result<NormalizedResponse, LlmError> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;

        let text: String = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter(|part| !part.thought.unwrap_or(false))
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        let usage = self.usage_metadata.map(|meta| {
            let thoughts = meta.thoughts_token_count.unwrap_or(0);
            TokenUsage {
                prompt_tokens: meta.prompt_token_count,
                completion_tokens: meta.candidates_token_count + thoughts,
                reasoning_tokens: meta.thoughts_token_count,
                cache_hit_tokens: None,
                cache_miss_tokens: None,
            }
        });

        let grounding = candidate.grounding_metadata.map(|meta| GroundingSummary {
            web_search_queries: meta.web_search_queries,
            source_count: meta.grounding_chunks.len(),
        });

        Ok(NormalizedResponse {
            text,
            finish_reason: Some(candidate.finish_reason.unwrap_or_else(|| "STOP".to_string())),
            usage,
            grounding,
        })
    }
}

#[async_trait]
impl LlmProvider for GroundedProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn generate(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<NormalizedResponse, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let body = build_request(request);

        tracing::debug!(
            provider = self.name(),
            model = %model,
            web_search = request.enable_web_search,
            "Sending generateContent request"
        );

        let http_response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(e, self.timeout_secs))?;

        let status = http_response.status();
        if !status.is_success() {
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(LlmError::from_status(
                status.as_u16(),
                chat::error_message(&error_text),
            ));
        }

        let api_response: GenerateResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let response = api_response.normalize()?;
        if let Some(grounding) = &response.grounding {
            tracing::debug!(
                model = %model,
                queries = grounding.web_search_queries.len(),
                sources = grounding.source_count,
                "Response grounded with web search"
            );
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

#[derive(Debug, Serialize)]
struct Tool {
    google_search: EmptyObject,
}

#[derive(Debug, Serialize)]
struct EmptyObject {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    top_p: f64,
    top_k: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    thoughts_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    web_search_queries: Vec<String>,
    #[serde(default)]
    grounding_chunks: Vec<serde_json::Value>,
}
