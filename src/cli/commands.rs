//! CLI command definitions for llm-orchestrator.
//!
//! `request` sends one prompt through the orchestrator, `validate` scores a
//! text file with the response validator, and `cost` aggregates saved usage
//! reports into a batch summary.

use clap::Parser;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::OrchestratorConfig;
use crate::llm::batch::BatchCostAggregator;
use crate::llm::pricing::PricingTable;
use crate::llm::provider::{Message, ResponseFormat};
use crate::llm::router::{default_registry, ProviderRouter};
use crate::llm::UsageTracker;
use crate::metrics::{export_metrics, init_metrics};
use crate::orchestrator::{ModelPlan, RequestOrchestrator, StageValue};
use crate::postprocess::JsonPostProcessor;
use crate::storage::FsArtifactWriter;
use crate::validation::{ResponseValidator, TextMetrics, ValidationLevel};

/// Default stage name for ad-hoc requests.
const DEFAULT_STAGE: &str = "cli";

/// Resilient multi-provider LLM request orchestrator.
#[derive(Parser)]
#[command(name = "llm-orchestrator")]
#[command(about = "Route LLM requests across providers with retry, fallback and validation")]
#[command(version)]
#[command(
    long_about = "llm-orchestrator sends prompts to DeepSeek, Gemini or OpenRouter models,\nretrying and falling back until a response passes quality validation.\n\nExample usage:\n  llm-orchestrator request --model deepseek-chat --fallback gemini-2.5-flash --prompt \"Explain Rust lifetimes\""
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Send one request through the orchestrator.
    #[command(alias = "req")]
    Request(RequestArgs),

    /// Validate a response text without calling any provider.
    Validate(ValidateArgs),

    /// Aggregate saved token usage reports into a batch cost report.
    Cost(CostArgs),
}

/// Arguments for `llm-orchestrator request`.
#[derive(Parser, Debug)]
pub struct RequestArgs {
    /// Stage name used for configuration lookup, artifacts and cost breakdown.
    #[arg(short, long, default_value = DEFAULT_STAGE)]
    pub stage: String,

    /// User prompt text.
    #[arg(short, long, conflicts_with = "prompt_file")]
    pub prompt: Option<String>,

    /// File holding the user prompt ("-" for stdin).
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// Optional system prompt.
    #[arg(long)]
    pub system: Option<String>,

    /// Primary model (overrides the stage configuration).
    #[arg(short, long)]
    pub model: Option<String>,

    /// Fallback model used after the primary exhausts its attempts.
    #[arg(long, requires = "model")]
    pub fallback: Option<String>,

    /// Validation level (none, minimal, full).
    #[arg(long)]
    pub validation: Option<ValidationLevel>,

    /// Expected response language (e.g. ru, en, es).
    #[arg(long)]
    pub language: Option<String>,

    /// Minimum response length in characters.
    #[arg(long)]
    pub min_length: Option<usize>,

    /// Parse the response as JSON; parse failures are retried.
    #[arg(long)]
    pub json: bool,

    /// Enable provider-side web search grounding.
    #[arg(long)]
    pub web_search: bool,

    /// YAML configuration file (can also be set via LLM_ORCH_CONFIG).
    #[arg(short, long, env = "LLM_ORCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for per-attempt request/response artifacts.
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    /// Directory to write token_usage_report.json into.
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Print Prometheus metrics after the request.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `llm-orchestrator validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Text file to validate ("-" for stdin).
    pub file: PathBuf,

    /// Validation level (none, minimal, full).
    #[arg(long, default_value = "full")]
    pub level: ValidationLevel,

    /// Finish reason reported by the provider.
    #[arg(long)]
    pub finish_reason: Option<String>,

    /// Expected language.
    #[arg(long)]
    pub language: Option<String>,

    /// Minimum length in characters.
    #[arg(long)]
    pub min_length: Option<usize>,
}

/// Arguments for `llm-orchestrator cost`.
#[derive(Parser, Debug)]
pub struct CostArgs {
    /// token_usage_report.json files, one per topic.
    #[arg(required = true)]
    pub reports: Vec<PathBuf>,

    /// Directory to write batch_cost_report.json into.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Request(args) => run_request_command(args).await,
        Commands::Validate(args) => run_validate_command(args),
        Commands::Cost(args) => run_cost_command(args),
    }
}

// ============================================================================
// Request Command Implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct RequestOutput<'a> {
    stage: &'a str,
    model_used: &'a str,
    attempts: usize,
    value: &'a StageValue,
    cost_usd: f64,
}

async fn run_request_command(args: RequestArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => OrchestratorConfig::from_yaml_file(path)?,
        None => OrchestratorConfig::from_env()?,
    };

    let pricing = match &config.pricing_path {
        Some(path) => PricingTable::from_json_file(path)?,
        None => PricingTable::default(),
    };
    let usage = Arc::new(UsageTracker::new(pricing));

    let prompt = match (&args.prompt, &args.prompt_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => read_input(path)?,
        (None, None) => anyhow::bail!("Provide the prompt via --prompt <TEXT> or --prompt-file <PATH>."),
    };

    let mut messages = Vec::new();
    if let Some(system) = &args.system {
        messages.push(Message::system(system.clone()));
    }
    messages.push(Message::user(prompt));

    let mut spec = config.request_for(&args.stage, messages);
    if let Some(model) = &args.model {
        let mut plan = ModelPlan::new(model.clone());
        if let Some(fallback) = &args.fallback {
            plan = plan.with_fallback(fallback.clone());
        }
        spec = spec.with_models(plan);
    }
    if let Some(level) = args.validation {
        spec = spec.with_validation(level);
    }
    if let Some(language) = &args.language {
        spec = spec.with_target_language(language.clone());
    }
    if let Some(min_length) = args.min_length {
        spec = spec.with_min_length(min_length);
    }
    if args.json {
        spec = spec
            .with_response_format(ResponseFormat::JsonObject)
            .with_post_processor(JsonPostProcessor::new());
    }
    if args.web_search {
        spec = spec.with_web_search();
    }

    if args.metrics {
        init_metrics()?;
    }

    let router = Arc::new(ProviderRouter::new(default_registry()));
    let mut orchestrator =
        RequestOrchestrator::new(router, config.clone()).with_usage_tracker(usage.clone());
    if let Some(dir) = args.artifacts.clone().or_else(|| config.artifact_dir.clone()) {
        info!(path = %dir.display(), "Saving LLM interactions");
        orchestrator = orchestrator.with_artifact_writer(Arc::new(FsArtifactWriter::new(dir)));
    }

    let result = orchestrator.execute(&spec).await?;
    usage.log_summary();

    let output = RequestOutput {
        stage: &args.stage,
        model_used: &result.model_used,
        attempts: result.attempts.len(),
        value: &result.value,
        cost_usd: usage.summarize().total_cost_usd(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if let Some(dir) = &args.report_dir {
        usage.save_report(dir)?;
    }
    if args.metrics {
        print!("{}", export_metrics());
    }

    Ok(())
}

// ============================================================================
// Validate Command Implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct ValidateOutput {
    accepted: bool,
    reason: String,
    char_count: usize,
    compression_ratio: f64,
    entropy: f64,
    bigram_uniqueness: f64,
    word_density: f64,
}

fn run_validate_command(args: ValidateArgs) -> anyhow::Result<()> {
    let text = read_input(&args.file)?;

    let mut validator = ResponseValidator::new();
    if let Some(min_length) = args.min_length {
        validator = validator.with_min_length(min_length);
    }
    let verdict = validator.validate(
        &text,
        args.level,
        args.finish_reason.as_deref(),
        args.language.as_deref(),
    );
    let metrics = TextMetrics::compute(text.trim());

    let output = ValidateOutput {
        accepted: verdict.accepted,
        reason: verdict.reason,
        char_count: text.chars().count(),
        compression_ratio: metrics.compression_ratio,
        entropy: metrics.entropy,
        bigram_uniqueness: metrics.bigram_uniqueness,
        word_density: metrics.word_density,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

// ============================================================================
// Cost Command Implementation
// ============================================================================

fn run_cost_command(args: CostArgs) -> anyhow::Result<()> {
    let mut aggregator = BatchCostAggregator::new();
    for path in &args.reports {
        aggregator
            .add_report_file(topic_name(path), path)
            .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))?;
    }

    let summary = aggregator.summarize();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(dir) = &args.output {
        let path = aggregator.save_report(dir)?;
        info!(path = %path.display(), topics = aggregator.len(), "Saved batch cost report");
    }
    Ok(())
}

/// Topic label for a report: its parent directory name, else the file stem.
fn topic_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .or_else(|| path.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read a file, or stdin when the path is "-".
fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))
    }
}
