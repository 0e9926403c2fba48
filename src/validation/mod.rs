//! Response validation.
//!
//! This module scores model output for degenerate patterns and language
//! correctness before the orchestrator accepts it.

pub mod custom;
pub mod language;
pub mod response;

pub use custom::{translation_validator, CustomValidator, SharedValidator};
pub use language::{requirement_for, Script};
pub use response::{
    ResponseValidator, TextMetrics, ValidationLevel, ValidationThresholds, Verdict,
};
