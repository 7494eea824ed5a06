// ABOUTME: HTTP-level tests for the generation backends against a local mock server
// ABOUTME: Covers request shape, response decoding, and error classification

use natter::backends::{KoboldBackend, OpenAiBackend};
use natter_core::config::BackendConfig;
use natter_core::traits::{GenerationBackend, GenerationRequest};
use natter_core::{BackendError, ChatMessage, Persona};
use serde_json::json;

fn config(base_url: &str) -> BackendConfig {
    BackendConfig {
        base_url: Some(base_url.to_string()),
        api_key: Some("sk-test".to_string()),
        model: Some("test-model".to_string()),
        ..BackendConfig::default()
    }
}

struct Fixture {
    persona: Persona,
    history: Vec<ChatMessage>,
    participants: Vec<String>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            persona: Persona::new("Aiko"),
            history: vec![ChatMessage::new("c1", "alice", "hello there")],
            participants: vec!["alice".to_string()],
        }
    }

    fn request(&self) -> GenerationRequest<'_> {
        GenerationRequest {
            persona: &self.persona,
            memory_prompt: "\n. ",
            history: &self.history,
            participants: &self.participants,
            is_reply: false,
        }
    }
}

// =============================================================================
// OpenAI-compatible
// =============================================================================

#[tokio::test]
async fn test_openai_generates_one_candidate_per_choice() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(mockito::Matcher::PartialJson(json!({
            "model": "test-model",
            "stream": false,
            "max_tokens": 300,
            "stop": ["alice:", "You:", "Tu:", "Me:"],
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [
                    {"message": {"role": "assistant", "content": "Hi alice!"}},
                    {"message": {"role": "assistant", "content": "Hello!"}}
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let backend = OpenAiBackend::from_config(&config(&server.url())).unwrap();
    let fixture = Fixture::new();
    let replies = backend.generate_replies(fixture.request()).await.unwrap();

    assert_eq!(replies, vec!["Hi alice!", "Hello!"]);
    assert!(!backend.splits_lines());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_openai_http_error_is_status() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(500)
        .with_body("upstream exploded")
        .create_async()
        .await;

    let backend = OpenAiBackend::from_config(&config(&server.url())).unwrap();
    let fixture = Fixture::new();
    let err = backend
        .generate_replies(fixture.request())
        .await
        .unwrap_err();

    match err {
        BackendError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream exploded");
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_openai_garbage_body_is_malformed() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body("<html>not json</html>")
        .create_async()
        .await;

    let backend = OpenAiBackend::from_config(&config(&server.url())).unwrap();
    let fixture = Fixture::new();
    let err = backend
        .generate_replies(fixture.request())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "malformed");
}

#[tokio::test]
async fn test_openai_summarize_joins_choices() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(
            json!({
                "choices": [{"message": {"content": "{\"alice\": [\"tea\", \"cats\", \"rain\"]}"}}]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let backend = OpenAiBackend::from_config(&config(&server.url())).unwrap();
    let summary = backend.summarize("summarize this").await.unwrap();
    assert_eq!(summary, r#"{"alice": ["tea", "cats", "rain"]}"#);
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let backend = OpenAiBackend::from_config(&config("http://127.0.0.1:1")).unwrap();
    let fixture = Fixture::new();
    let err = backend
        .generate_replies(fixture.request())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "transport");
}

// =============================================================================
// Kobold
// =============================================================================

#[tokio::test]
async fn test_kobold_returns_first_result_text() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/generate")
        .match_body(mockito::Matcher::PartialJson(json!({
            "max_length": 300,
            "stop_sequence": ["You:", "Tu:", "Me:", "alice:"],
        })))
        .with_status(200)
        .with_body(json!({"results": [{"text": "Hi!\nHow are you?"}]}).to_string())
        .create_async()
        .await;

    let backend = KoboldBackend::from_config(&config(&server.url())).unwrap();
    let fixture = Fixture::new();
    let replies = backend.generate_replies(fixture.request()).await.unwrap();

    assert_eq!(replies, vec!["Hi!\nHow are you?"]);
    assert!(backend.splits_lines());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_kobold_empty_results_is_empty_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/v1/generate")
        .with_status(200)
        .with_body(json!({"results": []}).to_string())
        .create_async()
        .await;

    let backend = KoboldBackend::from_config(&config(&server.url())).unwrap();
    let fixture = Fixture::new();
    let err = backend
        .generate_replies(fixture.request())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Empty));
}
