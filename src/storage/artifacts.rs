//! Per-attempt request/response artifacts.
//!
//! Every orchestrator attempt writes one request file and one raw-response
//! file under the stage's directory:
//!
//! ```text
//! {base}/{stage}/llm_requests/{attempt}_{timestamp}.json
//! {base}/{stage}/llm_responses_raw/{attempt}_{timestamp}.txt
//! ```
//!
//! Failed attempts carry an `ERROR_` prefix so they sort apart from the
//! accepted one.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::ArtifactError;
use crate::llm::provider::{NormalizedResponse, ProviderRequest};
use crate::orchestrator::AttemptRecord;

/// Prefix for failed attempts.
pub const ERROR_PREFIX: &str = "ERROR_";

/// Subdirectory holding request files.
pub const REQUESTS_DIR: &str = "llm_requests";

/// Subdirectory holding raw responses.
pub const RESPONSES_DIR: &str = "llm_responses_raw";

/// Separator between the response header and the raw text.
pub const HEADER_SEPARATOR_LEN: usize = 80;

/// Everything persisted for one attempt.
pub struct AttemptArtifact<'a> {
    pub record: &'a AttemptRecord,
    pub request: &'a ProviderRequest,
    /// Present unless the provider call itself failed.
    pub response: Option<&'a NormalizedResponse>,
}

/// Sink for attempt artifacts.
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    /// Persist one attempt.
    async fn write_attempt(&self, artifact: &AttemptArtifact<'_>) -> Result<(), ArtifactError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullArtifactWriter;

#[async_trait]
impl ArtifactWriter for NullArtifactWriter {
    async fn write_attempt(&self, _artifact: &AttemptArtifact<'_>) -> Result<(), ArtifactError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct RequestFile<'a> {
    timestamp: String,
    stage: &'a str,
    model: &'a str,
    attempt_index: u32,
    outcome: &'a str,
    reason: &'a str,
    fingerprint: String,
    request: &'a ProviderRequest,
}

/// Writes artifacts to the local filesystem.
#[derive(Debug, Clone)]
pub struct FsArtifactWriter {
    base_path: PathBuf,
}

impl FsArtifactWriter {
    /// Creates a writer rooted at `base_path`.
    ///
    /// # Arguments
    ///
    /// * `base_path` - Directory under which per-stage folders are created
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Returns the base storage path.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Request and response paths for an attempt.
    pub fn paths_for(&self, record: &AttemptRecord) -> (PathBuf, PathBuf) {
        let stage_dir = self.base_path.join(sanitize_component(&record.stage));
        let prefix = if record.outcome.is_success() {
            ""
        } else {
            ERROR_PREFIX
        };
        let stem = format!(
            "{}{}_{}",
            prefix,
            record.attempt_index,
            record.timestamp.format("%Y%m%d_%H%M%S_%3f")
        );
        (
            stage_dir.join(REQUESTS_DIR).join(format!("{}.json", stem)),
            stage_dir.join(RESPONSES_DIR).join(format!("{}.txt", stem)),
        )
    }

    /// Computes the SHA-256 fingerprint of a request's messages.
    pub fn compute_fingerprint(request: &ProviderRequest) -> String {
        let mut hasher = Sha256::new();
        for message in &request.messages {
            hasher.update(message.role.as_bytes());
            hasher.update([0u8]);
            hasher.update(message.content.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    async fn ensure_parent(path: &Path) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|source| {
                    ArtifactError::DirectoryCreationFailed {
                        path: parent.display().to_string(),
                        source,
                    }
                })?;
            }
        }
        Ok(())
    }

    async fn write_file(path: &Path, data: &[u8]) -> Result<(), ArtifactError> {
        Self::ensure_parent(path).await?;
        let mut file = fs::File::create(path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }
}

/// Metadata header followed by a separator line and the raw text.
fn render_response(artifact: &AttemptArtifact<'_>) -> String {
    let record = artifact.record;
    let finish_reason = artifact
        .response
        .and_then(|r| r.finish_reason.as_deref())
        .unwrap_or("-");
    let mut out = String::with_capacity(record.raw_text.len() + 512);
    out.push_str(&format!("Timestamp: {}\n", record.timestamp.to_rfc3339()));
    out.push_str(&format!("Stage: {}\n", record.stage));
    out.push_str(&format!("Model: {}\n", record.model));
    out.push_str(&format!("Attempt: {}\n", record.attempt_index));
    out.push_str(&format!("Outcome: {}\n", record.outcome));
    if !record.outcome.is_success() {
        out.push_str(&format!("Error: {}\n", record.reason));
    }
    out.push_str(&format!("Finish reason: {}\n", finish_reason));
    if let Some(usage) = artifact.response.and_then(|r| r.usage.as_ref()) {
        out.push_str(&format!(
            "Tokens: prompt={} completion={}\n",
            usage.prompt_tokens, usage.completion_tokens
        ));
    }
    out.push_str(&format!(
        "Response length: {} chars\n",
        record.raw_text.chars().count()
    ));
    out.push_str(&format!("Success: {}\n", record.outcome.is_success()));
    out.push_str(&"=".repeat(HEADER_SEPARATOR_LEN));
    out.push('\n');
    out.push_str(&record.raw_text);
    out
}

/// Keep a stage name usable as a single path component.
fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl ArtifactWriter for FsArtifactWriter {
    async fn write_attempt(&self, artifact: &AttemptArtifact<'_>) -> Result<(), ArtifactError> {
        let record = artifact.record;
        let (request_path, response_path) = self.paths_for(record);

        let request_file = RequestFile {
            timestamp: record.timestamp.to_rfc3339(),
            stage: &record.stage,
            model: &record.model,
            attempt_index: record.attempt_index,
            outcome: record.outcome.as_str(),
            reason: &record.reason,
            fingerprint: Self::compute_fingerprint(artifact.request),
            request: artifact.request,
        };
        let json = serde_json::to_vec_pretty(&request_file)?;
        Self::write_file(&request_path, &json).await?;
        Self::write_file(&response_path, render_response(artifact).as_bytes()).await?;

        tracing::debug!(
            request = %request_path.display(),
            response = %response_path.display(),
            "Saved LLM interaction"
        );
        Ok(())
    }
}
