//! Request, attempt and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::provider::{Message, ResponseFormat, TokenUsage};
use crate::llm::router::ProviderKind;
use crate::postprocess::{PostProcessor, SharedPostProcessor};
use crate::validation::{CustomValidator, SharedValidator, ValidationLevel};

/// One model in the attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider_kind: ProviderKind,
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
}

impl ModelSpec {
    pub fn new(
        name: impl Into<String>,
        provider_kind: ProviderKind,
        max_attempts: u32,
        per_attempt_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            provider_kind,
            max_attempts,
            per_attempt_timeout,
        }
    }
}

/// Primary model and optional fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPlan {
    pub primary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl ModelPlan {
    /// Create a plan with only a primary model.
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            fallback: None,
        }
    }

    /// Set the fallback model.
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Models in attempt order; a fallback equal to the primary is skipped.
    pub fn sequence(&self) -> Vec<&str> {
        let mut models = vec![self.primary.as_str()];
        if let Some(fallback) = self.fallback.as_deref() {
            if fallback != self.primary && !fallback.is_empty() {
                models.push(fallback);
            }
        }
        models
    }
}

/// Whether usage is recorded for rejected responses too.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsagePolicy {
    /// Only the accepted attempt is billed.
    #[default]
    SuccessOnly,
    /// Every response that reports usage is billed, accepted or not.
    AllResponses,
}

/// One logical request issued by a pipeline stage.
#[derive(Clone)]
pub struct RequestSpec {
    pub stage_name: String,
    pub messages: Vec<Message>,
    pub validation_level: ValidationLevel,
    pub target_language: Option<String>,
    /// Overrides the validator's minimum length.
    pub min_length: Option<usize>,
    pub post_processor: Option<SharedPostProcessor>,
    pub custom_validator: Option<SharedValidator>,
    /// Overrides the configured models for the stage.
    pub models: Option<ModelPlan>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub response_format: Option<ResponseFormat>,
    pub enable_web_search: bool,
}

impl fmt::Debug for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSpec")
            .field("stage_name", &self.stage_name)
            .field("messages", &self.messages.len())
            .field("validation_level", &self.validation_level)
            .field("target_language", &self.target_language)
            .field("min_length", &self.min_length)
            .field("post_processor", &self.post_processor.is_some())
            .field("custom_validator", &self.custom_validator.is_some())
            .field("models", &self.models)
            .field("enable_web_search", &self.enable_web_search)
            .finish_non_exhaustive()
    }
}

impl RequestSpec {
    /// Create a request with full validation and no post-processing.
    pub fn new(stage_name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            stage_name: stage_name.into(),
            messages,
            validation_level: ValidationLevel::Full,
            target_language: None,
            min_length: None,
            post_processor: None,
            custom_validator: None,
            models: None,
            temperature: None,
            max_tokens: None,
            response_format: None,
            enable_web_search: false,
        }
    }

    pub fn with_validation(mut self, level: ValidationLevel) -> Self {
        self.validation_level = level;
        self
    }

    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = Some(language.into());
        self
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    /// Attach a post-processor; its failure triggers a retry.
    pub fn with_post_processor(mut self, processor: impl PostProcessor + 'static) -> Self {
        self.post_processor = Some(Arc::new(processor));
        self
    }

    /// Attach an extra check run after the level checks.
    pub fn with_custom_validator(mut self, validator: impl CustomValidator + 'static) -> Self {
        self.custom_validator = Some(Arc::new(validator));
        self
    }

    /// Use these models instead of the stage configuration.
    pub fn with_models(mut self, plan: ModelPlan) -> Self {
        self.models = Some(plan);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_web_search(mut self) -> Self {
        self.enable_web_search = true;
        self
    }
}

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    ValidationFailed,
    PostProcessFailed,
    ProviderError,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::ValidationFailed => "validation_failed",
            AttemptOutcome::PostProcessFailed => "post_process_failed",
            AttemptOutcome::ProviderError => "provider_error",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a single attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub stage: String,
    pub model: String,
    /// 1-based, increasing across all models of one invocation.
    pub attempt_index: u32,
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub reason: String,
    pub raw_text: String,
    pub duration_ms: u64,
}

/// Accepted result value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageValue {
    /// Validated text (no post-processor).
    Text(String),
    /// Post-processor output.
    Json(Value),
}

impl StageValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StageValue::Text(text) => Some(text),
            StageValue::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            StageValue::Json(value) => Some(value),
            StageValue::Text(_) => None,
        }
    }
}

/// Successful orchestrator output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub value: StageValue,
    pub model_used: String,
    /// Every attempt of the invocation, the accepted one last.
    pub attempts: Vec<AttemptRecord>,
    /// Usage reported for the accepted response.
    pub usage: Option<TokenUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_plan_sequence() {
        assert_eq!(ModelPlan::new("a").sequence(), vec!["a"]);
        assert_eq!(
            ModelPlan::new("a").with_fallback("b").sequence(),
            vec!["a", "b"]
        );
        assert_eq!(ModelPlan::new("a").with_fallback("a").sequence(), vec!["a"]);
    }

    #[test]
    fn test_outcome_names() {
        assert_eq!(AttemptOutcome::PostProcessFailed.to_string(), "post_process_failed");
        let json = serde_json::to_string(&AttemptOutcome::ValidationFailed).expect("serialize");
        assert_eq!(json, "\"validation_failed\"");
        assert!(AttemptOutcome::Success.is_success());
        assert!(!AttemptOutcome::ProviderError.is_success());
    }

    #[test]
    fn test_request_spec_builder() {
        let spec = RequestSpec::new("outline", vec![Message::user("topic")])
            .with_validation(ValidationLevel::Minimal)
            .with_target_language("ru")
            .with_min_length(50)
            .with_models(ModelPlan::new("deepseek-chat").with_fallback("gemini-2.5-pro"))
            .with_web_search();

        assert_eq!(spec.validation_level, ValidationLevel::Minimal);
        assert_eq!(spec.target_language.as_deref(), Some("ru"));
        assert_eq!(spec.min_length, Some(50));
        assert!(spec.enable_web_search);
        assert!(spec.post_processor.is_none());
        assert!(format!("{:?}", spec).contains("outline"));
    }

    #[test]
    fn test_stage_value_accessors() {
        let text = StageValue::Text("hi".into());
        assert_eq!(text.as_text(), Some("hi"));
        assert!(text.as_json().is_none());
        let json = StageValue::Json(serde_json::json!({"a": 1}));
        assert_eq!(json.as_json().map(|v| v["a"].clone()), Some(serde_json::json!(1)));
    }
}
