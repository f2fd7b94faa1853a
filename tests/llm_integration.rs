//! Integration tests against a live OpenAI-compatible endpoint.
//!
//! These tests make real API calls.
//! Run with: LITELLM_API_BASE=http://localhost:4000 cargo test --test llm_integration -- --ignored

use std::sync::Arc;

use course_forge::llm::litellm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
use course_forge::llm::{GenerationOptions, Generator, LlmGenerator};
use course_forge::pipeline::artifacts::learning_outcomes;
use course_forge::regeneration::{RegenerationConfig, RegenerationEngine};

fn create_test_client() -> LiteLlmClient {
    LiteLlmClient::from_env()
        .expect("LITELLM_API_BASE environment variable must be set for integration tests")
}

fn test_model() -> String {
    std::env::var("COURSE_FORGE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string())
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        test_model(),
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(
        content.contains('4'),
        "Response should contain '4', got: {}",
        content
    );
}

#[tokio::test]
#[ignore]
async fn test_generator_respects_options() {
    let generator = LlmGenerator::new(Arc::new(create_test_client()));
    let options = GenerationOptions::default()
        .with_model(test_model())
        .with_temperature(0.0)
        .with_max_tokens(20);

    let content = generator
        .generate("Reply with the single word: ready", &options)
        .await
        .expect("Generation should succeed");

    assert!(
        content.to_lowercase().contains("ready"),
        "Response should contain 'ready', got: {}",
        content
    );
}

#[tokio::test]
#[ignore]
async fn test_critique_repairs_object_outcomes() {
    let generator: Arc<dyn Generator> = Arc::new(LlmGenerator::new(Arc::new(create_test_client())));
    let config = RegenerationConfig::default().with_generation(
        GenerationOptions::default()
            .with_model(test_model())
            .with_temperature(0.0),
    );
    let engine = RegenerationEngine::new(config).with_generator(generator);

    let result = engine
        .regenerate_default(
            r#"{"outcomes": [{"text": "Explain photosynthesis"}, {"text": "Describe the light reactions"}]}"#,
            "List the learning outcomes of an introductory photosynthesis course.",
            &learning_outcomes(),
        )
        .await;

    assert!(result.is_success(), "Regeneration failed: {:?}", result);
}
