//! Result post-processing.
//!
//! A post-processor turns validated raw text into a structured value. Its
//! failure counts as a failed attempt, so the orchestrator retries the same
//! model exactly as it would after a validation rejection.

pub mod json;

use serde_json::Value;
use std::sync::Arc;

use crate::error::PostProcessError;

pub use json::{JsonPostProcessor, ParseStrategy, DEFAULT_STRATEGIES};

/// Turns accepted response text into a structured result.
pub trait PostProcessor: Send + Sync {
    /// Process `text` produced by `model`.
    fn process(&self, text: &str, model: &str) -> Result<Value, PostProcessError>;
}

/// Closures returning `None` signal failure.
impl<F> PostProcessor for F
where
    F: Fn(&str, &str) -> Option<Value> + Send + Sync,
{
    fn process(&self, text: &str, model: &str) -> Result<Value, PostProcessError> {
        self(text, model).ok_or(PostProcessError::Empty)
    }
}

/// Shared handle stored on a request.
pub type SharedPostProcessor = Arc<dyn PostProcessor>;
