//! Cost aggregation across sessions in a batch run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::cost::{CostSummary, UsageBreakdown, UsageTotals};
use crate::error::ArtifactError;

/// File name written by [`BatchCostAggregator::save_report`].
pub const BATCH_REPORT_FILE: &str = "batch_cost_report.json";

/// One processed topic and its session totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCost {
    pub topic: String,
    pub requests: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
}

/// Batch-level summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub generated_at: DateTime<Utc>,
    pub topics_processed: usize,
    pub totals: UsageTotals,
    pub average_cost_per_topic: f64,
    /// Sorted by cost, most expensive first.
    pub by_model: Vec<UsageBreakdown>,
    /// In insertion order.
    pub topics: Vec<TopicCost>,
}

/// Collects per-topic [`CostSummary`] values.
#[derive(Debug, Default)]
pub struct BatchCostAggregator {
    topics: Vec<(String, CostSummary)>,
}

impl BatchCostAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a topic's session summary.
    pub fn add_topic(&mut self, topic: impl Into<String>, summary: CostSummary) {
        self.topics.push((topic.into(), summary));
    }

    /// Add a topic from a saved `token_usage_report.json`.
    pub fn add_report_file(
        &mut self,
        topic: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<(), ArtifactError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let summary: CostSummary = serde_json::from_str(&content)?;
        self.add_topic(topic, summary);
        Ok(())
    }

    /// Number of topics collected.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Returns true if no topics have been added.
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Build the batch summary.
    pub fn summarize(&self) -> BatchSummary {
        let mut totals = UsageTotals::default();
        let mut models: BTreeMap<String, UsageTotals> = BTreeMap::new();
        let mut topics = Vec::with_capacity(self.topics.len());

        for (topic, summary) in &self.topics {
            totals.merge(&summary.totals);
            for model in &summary.by_model {
                models.entry(model.name.clone()).or_default().merge(&model.totals);
            }
            topics.push(TopicCost {
                topic: topic.clone(),
                requests: summary.totals.requests,
                total_tokens: summary.totals.total_tokens,
                total_cost_usd: summary.totals.total_cost_usd,
            });
        }

        let mut by_model: Vec<UsageBreakdown> = models
            .into_iter()
            .map(|(name, totals)| UsageBreakdown { name, totals })
            .collect();
        by_model.sort_by(|a, b| b.totals.total_cost_usd.total_cmp(&a.totals.total_cost_usd));

        let average_cost_per_topic = if topics.is_empty() {
            0.0
        } else {
            totals.total_cost_usd / topics.len() as f64
        };

        BatchSummary {
            generated_at: Utc::now(),
            topics_processed: topics.len(),
            totals,
            average_cost_per_topic,
            by_model,
            topics,
        }
    }

    /// Write the batch summary as `batch_cost_report.json` into `dir`.
    pub fn save_report(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ArtifactError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| ArtifactError::DirectoryCreationFailed {
            path: dir.display().to_string(),
            source,
        })?;
        let path = dir.join(BATCH_REPORT_FILE);
        let summary = self.summarize();
        std::fs::write(&path, serde_json::to_string_pretty(&summary)?)?;
        tracing::info!(
            path = %path.display(),
            topics = summary.topics_processed,
            total_cost_usd = format!("{:.4}", summary.totals.total_cost_usd),
            "Saved batch cost report"
        );
        Ok(path)
    }
}
