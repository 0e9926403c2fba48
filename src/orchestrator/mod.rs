//! Request orchestration.
//!
//! [`RequestOrchestrator::execute`] sends a [`RequestSpec`] to the primary
//! model, retrying within its attempt budget, then to the fallback model, and
//! returns the first response that passes validation and post-processing.
//!
//! ```ignore
//! use llm_orchestrator::llm::Message;
//! use llm_orchestrator::orchestrator::{ModelPlan, RequestSpec};
//! use llm_orchestrator::postprocess::JsonPostProcessor;
//!
//! let spec = RequestSpec::new("outline", vec![Message::user("Outline: Rust async")])
//!     .with_models(ModelPlan::new("deepseek-chat").with_fallback("gemini-2.5-flash"))
//!     .with_post_processor(JsonPostProcessor::new());
//! let result = orchestrator.execute(&spec).await?;
//! println!("{} -> {:?}", result.model_used, result.value);
//! ```

pub mod engine;
pub mod request;

pub use engine::{RequestOrchestrator, RetryPolicy};
pub use request::{
    AttemptOutcome, AttemptRecord, ModelPlan, ModelSpec, RequestSpec, StageResult, StageValue,
    UsagePolicy,
};
