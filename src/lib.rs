//! llm-orchestrator: resilient multi-provider LLM request orchestration.
//!
//! This library routes generation requests to interchangeable providers,
//! retries and falls back across models, rejects degenerate responses before
//! accepting them, and tracks token usage and cost per stage and model.

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod postprocess;
pub mod storage;
pub mod validation;

// Re-export commonly used types
pub use config::{OrchestratorConfig, StageModels};
pub use error::{ArtifactError, ConfigError, LlmError, OrchestratorError, PricingError};
pub use orchestrator::{RequestOrchestrator, RequestSpec, StageResult};
