//! Integration tests against the real provider APIs.
//!
//! Run with: DEEPSEEK_API_KEY=... GEMINI_API_KEY=... OPENROUTER_API_KEY=... \
//!     cargo test --test llm_integration -- --ignored

use llm_orchestrator::config::OrchestratorConfig;
use llm_orchestrator::llm::provider::{LlmProvider, Message, ProviderRequest};
use llm_orchestrator::llm::providers::{DirectProvider, GatewayProvider, GroundedProvider};
use llm_orchestrator::llm::router::{ProviderRegistry, ProviderRouter};
use llm_orchestrator::orchestrator::{ModelPlan, RequestOrchestrator, RequestSpec};
use llm_orchestrator::postprocess::JsonPostProcessor;
use llm_orchestrator::validation::ValidationLevel;
use std::sync::Arc;

fn arithmetic_request() -> ProviderRequest {
    ProviderRequest::new(vec![
        Message::system("You are a helpful assistant. Reply concisely."),
        Message::user("What is 2 + 2? Reply with just the number."),
    ])
    .with_max_tokens(10)
    .with_temperature(0.0)
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_direct_generation() {
    let provider = DirectProvider::from_env().expect("DEEPSEEK_API_KEY must be set");

    let response = provider
        .generate("deepseek-chat", &arithmetic_request())
        .await
        .expect("Generation should succeed");

    assert!(
        response.text.contains('4'),
        "Response should contain '4', got: {}",
        response.text
    );
    assert!(response.usage.is_some_and(|u| u.total() > 0));
}

#[tokio::test]
#[ignore]
async fn test_grounded_generation_with_search() {
    let provider = GroundedProvider::from_env().expect("GEMINI_API_KEY must be set");
    let request = ProviderRequest::new(vec![Message::user(
        "Name the current stable Rust release in one sentence.",
    )])
    .with_web_search();

    let response = provider
        .generate("gemini-2.5-flash", &request)
        .await
        .expect("Generation should succeed");

    assert!(!response.text.is_empty(), "Response should not be empty");
    assert!(response.finish_reason.is_some());
}

#[tokio::test]
#[ignore]
async fn test_gateway_multi_turn_conversation() {
    let provider = GatewayProvider::from_env().expect("OPENROUTER_API_KEY must be set");
    let request = ProviderRequest::new(vec![
        Message::system("You are a math tutor. Be concise."),
        Message::user("Remember the number 42."),
        Message::assistant("I'll remember 42."),
        Message::user("What number did I ask you to remember?"),
    ])
    .with_max_tokens(20)
    .with_temperature(0.0);

    let response = provider
        .generate("openai/gpt-4o-mini", &request)
        .await
        .expect("Generation should succeed");

    assert!(
        response.text.contains("42"),
        "Response should mention 42, got: {}",
        response.text
    );
}

#[tokio::test]
#[ignore]
async fn test_orchestrated_json_request() {
    let router = Arc::new(ProviderRouter::new(Arc::new(ProviderRegistry::new(120))));
    let orchestrator = RequestOrchestrator::new(router, OrchestratorConfig::default());
    let spec = RequestSpec::new(
        "integration",
        vec![Message::user(
            "Return a JSON object with a \"colors\" array of three color names.",
        )],
    )
    .with_models(ModelPlan::new("deepseek-chat").with_fallback("gemini-2.5-flash"))
    .with_validation(ValidationLevel::Minimal)
    .with_min_length(10)
    .with_post_processor(JsonPostProcessor::new());

    let result = orchestrator
        .execute(&spec)
        .await
        .expect("Orchestrated request should succeed");

    let value = result.value.as_json().expect("JSON value");
    assert_eq!(value["colors"].as_array().map(Vec::len), Some(3));
    assert!(orchestrator.usage().request_count() >= 1);
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    let provider = DirectProvider::with_base_url(
        "invalid-key".to_string(),
        "http://127.0.0.1:9".to_string(),
    )
    .expect("client");

    let err = provider
        .generate("deepseek-chat", &arithmetic_request())
        .await
        .expect_err("Should fail without a reachable server");
    // Nothing listens on the discard port: a transport failure, which is retryable.
    assert!(err.is_transient());
}
