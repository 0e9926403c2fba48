//! Orchestrator configuration.
//!
//! Per-stage model assignments, the retry schedule, request defaults,
//! validation thresholds and output locations. Loaded from YAML, from
//! `LLM_ORCH_*` environment variables, or built in code.
//!
//! ```yaml
//! stages:
//!   generate_article:
//!     primary: deepseek-reasoner
//!     fallback: gemini-2.5-pro
//!     target_language: ru
//!   outline:
//!     primary: deepseek-chat
//!     validation_level: minimal
//!     min_length: 50
//! retry:
//!   max_attempts: 3
//!   delays_secs: [2, 5, 10]
//! attempt_timeout_secs: 600
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::provider::Message;
use crate::orchestrator::{ModelPlan, RequestSpec, UsagePolicy};
use crate::validation::{ValidationLevel, ValidationThresholds};

/// Suffix used by per-section stages (`generate_article_section_3`).
const SECTION_MARKER: &str = "_section_";

/// Models and validation settings for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageModels {
    pub primary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_level: Option<ValidationLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub enable_web_search: bool,
}

impl StageModels {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            fallback: None,
            validation_level: None,
            target_language: None,
            min_length: None,
            enable_web_search: false,
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn with_validation(mut self, level: ValidationLevel) -> Self {
        self.validation_level = Some(level);
        self
    }

    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = Some(language.into());
        self
    }

    pub fn plan(&self) -> ModelPlan {
        ModelPlan {
            primary: self.primary.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per model.
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` on the same model is `delays_secs[n - 1]`;
    /// the last entry repeats.
    pub delays_secs: Vec<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays_secs: vec![2, 5, 10],
        }
    }
}

/// Configuration for the request orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Stage name to model assignment.
    pub stages: BTreeMap<String, StageModels>,
    pub retry: RetrySettings,
    /// Wall-clock limit for one provider call.
    pub attempt_timeout_secs: u64,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub validation: ValidationThresholds,
    pub usage_policy: UsagePolicy,
    /// JSON pricing table; the builtin table is used when unset.
    pub pricing_path: Option<PathBuf>,
    /// Root for per-attempt artifacts; nothing is written when unset.
    pub artifact_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stages: BTreeMap::new(),
            retry: RetrySettings::default(),
            attempt_timeout_secs: 600,
            temperature: 0.3,
            max_tokens: None,
            validation: ValidationThresholds::default(),
            usage_policy: UsagePolicy::default(),
            pricing_path: None,
            artifact_dir: None,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file and validates it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, is not valid YAML, or
    /// fails validation.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LLM_ORCH_CONFIG`: YAML file loaded first, then overridden by the rest
    /// - `LLM_ORCH_MAX_ATTEMPTS`: Attempts per model (default: 3)
    /// - `LLM_ORCH_RETRY_DELAYS`: Comma-separated delays in seconds (default: 2,5,10)
    /// - `LLM_ORCH_ATTEMPT_TIMEOUT_SECS`: Per-attempt timeout (default: 600)
    /// - `LLM_ORCH_TEMPERATURE`: Sampling temperature (default: 0.3)
    /// - `LLM_ORCH_MAX_TOKENS`: Completion token cap
    /// - `LLM_ORCH_MIN_LENGTH`: Validator minimum length (default: 100)
    /// - `LLM_ORCH_BILL_ALL_RESPONSES`: Record usage for rejected responses too
    /// - `LLM_ORCH_PRICING_PATH`: Pricing table JSON
    /// - `LLM_ORCH_ARTIFACT_DIR`: Artifact root directory
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the result
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("LLM_ORCH_CONFIG") {
            Ok(path) => {
                let contents = std::fs::read_to_string(&path)?;
                serde_yaml::from_str(&contents)?
            }
            Err(_) => Self::default(),
        };

        if let Ok(val) = std::env::var("LLM_ORCH_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_env_value(&val, "LLM_ORCH_MAX_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("LLM_ORCH_RETRY_DELAYS") {
            config.retry.delays_secs = val
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| parse_env_value(s.trim(), "LLM_ORCH_RETRY_DELAYS"))
                .collect::<Result<_, _>>()?;
        }

        if let Ok(val) = std::env::var("LLM_ORCH_ATTEMPT_TIMEOUT_SECS") {
            config.attempt_timeout_secs = parse_env_value(&val, "LLM_ORCH_ATTEMPT_TIMEOUT_SECS")?;
        }

        if let Ok(val) = std::env::var("LLM_ORCH_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "LLM_ORCH_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("LLM_ORCH_MAX_TOKENS") {
            config.max_tokens = Some(parse_env_value(&val, "LLM_ORCH_MAX_TOKENS")?);
        }

        if let Ok(val) = std::env::var("LLM_ORCH_MIN_LENGTH") {
            config.validation.min_length = parse_env_value(&val, "LLM_ORCH_MIN_LENGTH")?;
        }

        if let Ok(val) = std::env::var("LLM_ORCH_BILL_ALL_RESPONSES") {
            config.usage_policy = if parse_env_bool(&val, "LLM_ORCH_BILL_ALL_RESPONSES")? {
                UsagePolicy::AllResponses
            } else {
                UsagePolicy::SuccessOnly
            };
        }

        if let Ok(val) = std::env::var("LLM_ORCH_PRICING_PATH") {
            config.pricing_path = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("LLM_ORCH_ARTIFACT_DIR") {
            config.artifact_dir = Some(PathBuf::from(val));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.attempt_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "attempt_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        let v = &self.validation;
        if v.min_word_density > v.max_word_density {
            return Err(ConfigError::ValidationFailed(
                "validation.min_word_density cannot exceed max_word_density".to_string(),
            ));
        }

        if v.max_compression_ratio <= 1.0 {
            return Err(ConfigError::ValidationFailed(
                "validation.max_compression_ratio must be greater than 1.0".to_string(),
            ));
        }

        for (name, stage) in &self.stages {
            if stage.primary.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "stage '{}' has an empty primary model",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Builder method to add a stage.
    pub fn with_stage(mut self, name: impl Into<String>, models: StageModels) -> Self {
        self.stages.insert(name.into(), models);
        self
    }

    /// Builder method to set the retry schedule.
    pub fn with_retry(mut self, max_attempts: u32, delays_secs: Vec<u64>) -> Self {
        self.retry = RetrySettings {
            max_attempts,
            delays_secs,
        };
        self
    }

    /// Builder method to set the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Builder method to set the validation thresholds.
    pub fn with_validation(mut self, thresholds: ValidationThresholds) -> Self {
        self.validation = thresholds;
        self
    }

    /// Builder method to set the usage policy.
    pub fn with_usage_policy(mut self, policy: UsagePolicy) -> Self {
        self.usage_policy = policy;
        self
    }

    /// Builder method to set the artifact directory.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    /// Stage settings, falling back to the parent stage for
    /// `<stage>_section_<n>` names.
    pub fn stage(&self, name: &str) -> Option<&StageModels> {
        self.stages
            .get(name)
            .or_else(|| self.stages.get(base_stage_name(name)))
    }

    /// Model plan for a stage.
    pub fn models_for(&self, stage: &str) -> Option<ModelPlan> {
        self.stage(stage).map(StageModels::plan)
    }

    /// Build a request for `stage` carrying the stage's configured settings.
    pub fn request_for(&self, stage: &str, messages: Vec<Message>) -> RequestSpec {
        let mut spec = RequestSpec::new(stage, messages);
        if let Some(settings) = self.stage(stage) {
            if let Some(level) = settings.validation_level {
                spec = spec.with_validation(level);
            }
            if let Some(language) = &settings.target_language {
                spec = spec.with_target_language(language.clone());
            }
            if let Some(min_length) = settings.min_length {
                spec = spec.with_min_length(min_length);
            }
            if settings.enable_web_search {
                spec = spec.with_web_search();
            }
        }
        spec
    }
}

/// Strip a `_section_<n>` suffix.
fn base_stage_name(stage: &str) -> &str {
    match stage.find(SECTION_MARKER) {
        Some(pos) => &stage[..pos],
        None => stage,
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
