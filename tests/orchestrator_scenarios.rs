//! End-to-end orchestrator behavior with a scripted in-process router.

use async_trait::async_trait;
use llm_orchestrator::config::{OrchestratorConfig, StageModels};
use llm_orchestrator::llm::provider::{Message, NormalizedResponse, ProviderRequest, TokenUsage};
use llm_orchestrator::llm::router::RouteProvider;
use llm_orchestrator::llm::{PricingModel, PricingTable, UsageTracker};
use llm_orchestrator::orchestrator::{
    AttemptOutcome, ModelSpec, RequestOrchestrator, RequestSpec, RetryPolicy,
};
use llm_orchestrator::postprocess::JsonPostProcessor;
use llm_orchestrator::storage::FsArtifactWriter;
use llm_orchestrator::validation::ValidationLevel;
use llm_orchestrator::{LlmError, OrchestratorError};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const GOOD_TEXT: &str = "The orchestrator sends each request to a backend chosen by model name. \
    When a reply arrives, a validator measures how compressible the text is, how varied its \
    characters are, and whether the words look like natural language. Rejected replies are \
    retried a few times with growing pauses before a second model is tried instead.";

type Reply = Result<NormalizedResponse, LlmError>;

/// Replays scripted replies and records which model each call went to.
struct ScriptedRouter {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRouter {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl RouteProvider for ScriptedRouter {
    async fn route(&self, model: &ModelSpec, _request: &ProviderRequest) -> Reply {
        self.calls.lock().expect("lock").push(model.name.clone());
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(degenerate()))
    }
}

fn reply(text: &str) -> Reply {
    Ok(NormalizedResponse::new(text, "stop").with_usage(TokenUsage::new(1_000_000, 0)))
}

fn degenerate() -> NormalizedResponse {
    NormalizedResponse::new("-о-".repeat(2000), "stop").with_usage(TokenUsage::new(1_000_000, 0))
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig::new().with_stage(
        "generate_article",
        StageModels::new("deepseek-reasoner").with_fallback("gemini-2.5-pro"),
    )
}

fn pricing() -> PricingTable {
    let flat = |input_cost| PricingModel::FlatRate {
        input_cost,
        output_cost: 0.0,
    };
    PricingTable::empty()
        .with_model("deepseek-reasoner", flat(1.0))
        .with_model("gemini-2.5-pro", flat(2.0))
}

fn orchestrator(router: Arc<ScriptedRouter>) -> RequestOrchestrator {
    RequestOrchestrator::new(router, config())
        .with_retry_policy(RetryPolicy::default().without_backoff())
        .with_usage_tracker(Arc::new(UsageTracker::new(pricing())))
}

fn article_request() -> RequestSpec {
    RequestSpec::new(
        "generate_article",
        vec![
            Message::system("You write technical articles."),
            Message::user("Write about retry loops."),
        ],
    )
}

#[tokio::test]
async fn test_fallback_after_primary_exhausts_validation() {
    let router = ScriptedRouter::new(vec![
        Ok(degenerate()),
        Ok(degenerate()),
        Ok(degenerate()),
        reply(GOOD_TEXT),
    ]);
    let orch = orchestrator(router.clone());

    let result = orch.execute(&article_request()).await.expect("fallback accepted");

    assert_eq!(result.model_used, "gemini-2.5-pro");
    assert_eq!(result.value.as_text(), Some(GOOD_TEXT));
    assert_eq!(result.attempts.len(), 4);
    for (i, attempt) in result.attempts.iter().enumerate() {
        assert_eq!(attempt.attempt_index, i as u32 + 1);
    }
    assert!(result.attempts[..3].iter().all(|a| {
        a.outcome == AttemptOutcome::ValidationFailed && a.reason.starts_with("high_compression")
    }));
    assert_eq!(result.attempts[3].outcome, AttemptOutcome::Success);
    assert_eq!(
        router.calls(),
        vec![
            "deepseek-reasoner",
            "deepseek-reasoner",
            "deepseek-reasoner",
            "gemini-2.5-pro"
        ]
    );

    // Only the accepted attempt is billed: 1M prompt tokens at $2/1M.
    let summary = orch.usage().summarize();
    assert_eq!(summary.totals.requests, 1);
    assert!((summary.total_cost_usd() - 2.0).abs() < 1e-9);
    assert_eq!(summary.by_stage[0].name, "generate_article");
}

#[tokio::test]
async fn test_exhaustion_after_total_attempt_bound() {
    let router = ScriptedRouter::new(Vec::new());
    let orch = orchestrator(router.clone());

    let err = orch.execute(&article_request()).await.expect_err("exhausted");

    match &err {
        OrchestratorError::Exhausted {
            stage,
            models,
            attempts,
        } => {
            assert_eq!(stage, "generate_article");
            assert_eq!(models, &["deepseek-reasoner", "gemini-2.5-pro"]);
            assert_eq!(attempts.len(), 6);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert_eq!(router.calls().len(), 6);
    assert_eq!(orch.usage().request_count(), 0);
}

#[tokio::test]
async fn test_no_calls_after_success() {
    let router = ScriptedRouter::new(vec![reply(GOOD_TEXT), reply(GOOD_TEXT)]);
    let orch = orchestrator(router.clone());

    let result = orch.execute(&article_request()).await.expect("accepted");

    assert_eq!(result.model_used, "deepseek-reasoner");
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(router.calls().len(), 1);
}

#[tokio::test]
async fn test_post_processor_failure_retries_same_model() {
    let router = ScriptedRouter::new(vec![
        reply("Sorry, here is the outline without any JSON at all, as plain prose."),
        reply("```json\n{\"sections\": [\"Intro\", \"Retries\"]}\n```"),
    ]);
    let orch = orchestrator(router.clone());
    let spec = article_request()
        .with_validation(ValidationLevel::None)
        .with_post_processor(JsonPostProcessor::new());

    let result = orch.execute(&spec).await.expect("second attempt parses");

    assert_eq!(result.model_used, "deepseek-reasoner");
    assert_eq!(
        result.value.as_json(),
        Some(&json!({"sections": ["Intro", "Retries"]}))
    );
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::PostProcessFailed);
    assert!(result.attempts[0].reason.starts_with("post_process_failed"));
    assert_eq!(router.calls(), vec!["deepseek-reasoner", "deepseek-reasoner"]);
}

#[tokio::test]
async fn test_fatal_error_aborts_without_fallback() {
    let router = ScriptedRouter::new(vec![
        Ok(degenerate()),
        Err(LlmError::Unauthorized {
            code: 401,
            message: "bad key".to_string(),
        }),
        reply(GOOD_TEXT),
    ]);
    let orch = orchestrator(router.clone());

    let err = orch.execute(&article_request()).await.expect_err("fatal");

    match err {
        OrchestratorError::Fatal { stage, model, source } => {
            assert_eq!(stage, "generate_article");
            assert_eq!(model, "deepseek-reasoner");
            assert!(!source.is_transient());
        }
        other => panic!("expected fatal error, got {:?}", other),
    }
    assert_eq!(router.calls().len(), 2);
}

#[tokio::test]
async fn test_language_rejection_then_fallback() {
    let russian = "Оркестратор отправляет каждый запрос поставщику, выбранному по имени модели. \
        Когда приходит ответ, проверка оценивает, насколько хорошо сжимается текст и насколько \
        разнообразны его символы. Отклонённые ответы повторяются несколько раз.";
    let router = ScriptedRouter::new(vec![
        reply(GOOD_TEXT),
        reply(GOOD_TEXT),
        reply(GOOD_TEXT),
        reply(russian),
    ]);
    let orch = orchestrator(router);
    let spec = article_request().with_target_language("ru");

    let result = orch.execute(&spec).await.expect("russian accepted");

    assert_eq!(result.model_used, "gemini-2.5-pro");
    assert!(result.attempts[0].reason.starts_with("not_russian"));
}

#[tokio::test]
async fn test_every_attempt_is_persisted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = ScriptedRouter::new(vec![
        Ok(degenerate()),
        Err(LlmError::ApiError {
            code: 503,
            message: "unavailable".to_string(),
        }),
        reply(GOOD_TEXT),
    ]);
    let orch = orchestrator(router)
        .with_artifact_writer(Arc::new(FsArtifactWriter::new(dir.path())));

    orch.execute(&article_request()).await.expect("accepted");

    let stage_dir = dir.path().join("generate_article");
    let mut requests: Vec<String> = std::fs::read_dir(stage_dir.join("llm_requests"))
        .expect("requests dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    requests.sort();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].starts_with("3_"));
    assert!(requests[1].starts_with("ERROR_1_"));
    assert!(requests[2].starts_with("ERROR_2_"));

    let responses = std::fs::read_dir(stage_dir.join("llm_responses_raw"))
        .expect("responses dir")
        .count();
    assert_eq!(responses, 3);
}

/// Records the paused-clock instant of every call and always replies with
/// degenerate text.
struct TimedRouter {
    calls: Mutex<Vec<(String, Instant)>>,
}

#[async_trait]
impl RouteProvider for TimedRouter {
    async fn route(&self, model: &ModelSpec, _request: &ProviderRequest) -> Reply {
        self.calls
            .lock()
            .expect("lock")
            .push((model.name.clone(), Instant::now()));
        Ok(degenerate())
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_per_model_and_fallback_starts_immediately() {
    let router = Arc::new(TimedRouter {
        calls: Mutex::new(Vec::new()),
    });
    let orch = RequestOrchestrator::new(router.clone(), config());
    assert_eq!(
        orch.retry_policy().backoff,
        vec![
            Duration::from_secs(2),
            Duration::from_secs(5),
            Duration::from_secs(10)
        ]
    );

    orch.execute(&article_request()).await.expect_err("exhausted");

    let calls = router.calls.lock().expect("lock").clone();
    let models: Vec<&str> = calls.iter().map(|(m, _)| m.as_str()).collect();
    assert_eq!(
        models,
        vec![
            "deepseek-reasoner",
            "deepseek-reasoner",
            "deepseek-reasoner",
            "gemini-2.5-pro",
            "gemini-2.5-pro",
            "gemini-2.5-pro"
        ]
    );
    let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1].1 - w[0].1).collect();
    let expected = [2, 5, 0, 2, 5].map(Duration::from_secs);
    assert_eq!(gaps.len(), expected.len());
    for (gap, want) in gaps.iter().zip(expected) {
        // The timer wheel rounds deadlines up to the next millisecond.
        assert!(
            *gap >= want && *gap <= want + Duration::from_millis(5),
            "gaps {:?}, expected {:?}",
            gaps,
            expected
        );
    }
}
