//! Error types for llm-orchestrator operations.
//!
//! Defines error types for the major subsystems:
//! - Provider calls and failure classification
//! - Request orchestration (fatal abort, exhausted retry budget)
//! - Configuration loading
//! - Pricing tables
//! - Artifact persistence
//! - Result post-processing

use thiserror::Error;

use crate::orchestrator::AttemptRecord;

/// How a provider failure should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Safe to retry within the current model's attempt budget.
    Transient,
    /// Authentication or configuration problem; retrying cannot help.
    Fatal,
}

/// Errors that can occur during LLM provider operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: {env_var} environment variable not set")]
    MissingApiKey { env_var: String },

    #[error("Authentication rejected ({code}): {message}")]
    Unauthorized { code: u16, message: String },

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("No provider configured for kind '{0}'")]
    UnknownProvider(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Provider returned no content")]
    EmptyResponse,
}

impl LlmError {
    /// Classify this error for the retry loop.
    ///
    /// Credentials, unknown models and unknown providers are fatal. Timeouts,
    /// rate limits, 5xx responses, transport failures and malformed bodies are
    /// transient.
    pub fn severity(&self) -> Severity {
        match self {
            LlmError::MissingApiKey { .. }
            | LlmError::Unauthorized { .. }
            | LlmError::InvalidModel(_)
            | LlmError::UnknownProvider(_) => Severity::Fatal,
            LlmError::RateLimited(_)
            | LlmError::Timeout { .. }
            | LlmError::RequestFailed(_)
            | LlmError::ApiError { .. }
            | LlmError::ParseError(_)
            | LlmError::EmptyResponse => Severity::Transient,
        }
    }

    /// Returns true if the orchestrator may retry after this error.
    pub fn is_transient(&self) -> bool {
        self.severity() == Severity::Transient
    }

    /// Map a non-success HTTP status and body into the matching variant.
    pub fn from_status(code: u16, message: String) -> Self {
        match code {
            401 | 403 => LlmError::Unauthorized { code, message },
            404 => LlmError::InvalidModel(message),
            429 => LlmError::RateLimited(message),
            _ => LlmError::ApiError { code, message },
        }
    }

    /// Map a reqwest transport error, keeping timeouts distinct.
    pub fn from_transport(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            LlmError::Timeout {
                seconds: timeout_secs,
            }
        } else {
            LlmError::RequestFailed(err.to_string())
        }
    }
}

/// Errors that cross the orchestrator boundary.
///
/// Per-attempt failures are absorbed by the retry loop; only these two
/// outcomes (plus missing configuration) reach the caller.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Stage '{stage}' aborted on fatal provider error from '{model}': {source}")]
    Fatal {
        stage: String,
        model: String,
        #[source]
        source: LlmError,
    },

    #[error("All models failed for stage '{stage}' after {} attempts. Tried models: {models:?}", .attempts.len())]
    Exhausted {
        stage: String,
        models: Vec<String>,
        attempts: Vec<AttemptRecord>,
    },

    #[error("No primary model configured for stage '{0}'")]
    NoModelConfigured(String),
}

impl OrchestratorError {
    /// Attempt history carried by an exhausted invocation.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            OrchestratorError::Exhausted { attempts, .. } => attempts,
            _ => &[],
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while loading a pricing table.
#[derive(Debug, Error)]
pub enum PricingError {
    #[error("Pricing file not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid pricing JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while persisting request/response artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to create artifact directory {path}: {source}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by a post-processor.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PostProcessError {
    #[error("post-processor returned nothing")]
    Empty,

    #[error("post-processing failed: {0}")]
    Failed(String),
}
