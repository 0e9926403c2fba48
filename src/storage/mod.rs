//! Filesystem persistence for orchestrator attempts.
//!
//! # Usage
//!
//! ```rust,ignore
//! use llm_orchestrator::storage::FsArtifactWriter;
//! use std::sync::Arc;
//!
//! let writer = Arc::new(FsArtifactWriter::new("output/run-42"));
//! let orchestrator = RequestOrchestrator::new(router, config).with_artifact_writer(writer);
//! ```

pub mod artifacts;

pub use artifacts::{ArtifactWriter, AttemptArtifact, FsArtifactWriter, NullArtifactWriter};
