//! Command-line interface for llm-orchestrator.
//!
//! Provides commands for sending requests, validating response texts, and
//! aggregating cost reports.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
