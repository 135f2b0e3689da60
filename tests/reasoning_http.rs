mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bubble_lib::config::SafetyConfig;
use bubble_lib::errors::BubbleError;
use bubble_lib::llm::provider::ReasoningProvider;
use bubble_lib::llm::providers::gemini::GeminiProvider;
use bubble_lib::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use bubble_lib::llm::types::{CallConfig, InlineImage, ReasoningRequest};
use bubble_lib::retry::RetryPolicy;
use common::{gemini_reply, StubResponse, StubServer};

const GENERATE: &str = "/v1beta/models/gemini-2.5-flash:generateContent";

fn request() -> ReasoningRequest {
    ReasoningRequest {
        system_instruction: "answer with JSON".into(),
        prompt: "User goal: save the file".into(),
        image: Some(InlineImage {
            mime_type: "image/png".into(),
            data_base64: "iVBORw0KGgo=".into(),
        }),
    }
}

fn call() -> CallConfig {
    CallConfig {
        model: "gemini-2.5-flash".into(),
        temperature: 0.1,
    }
}

fn gemini(base: &str, attempts: u32) -> GeminiProvider {
    GeminiProvider::new(
        "gemini".into(),
        format!("{base}/v1beta"),
        "test-key".into(),
        SafetyConfig::default(),
        RetryPolicy::immediate(attempts),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn gemini_round_trip() {
    let stub = StubServer::start(|req| {
        if req.path == GENERATE && req.header("x-goog-api-key") == Some("test-key") {
            StubResponse::json(200, gemini_reply(r#"{"done": true}"#))
        } else {
            StubResponse::text(400, "unexpected request")
        }
    })
    .await;

    let text = gemini(&stub.base, 3).generate(&request(), &call()).await.unwrap();
    assert_eq!(text, r#"{"done": true}"#);

    let body = stub.requests()[0].json();
    assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    assert_eq!(body["systemInstruction"]["parts"][0]["text"], "answer with JSON");
    assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
    assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn gemini_retries_rate_limit() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let stub = StubServer::start(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            StubResponse::text(429, "slow down")
        } else {
            StubResponse::json(200, gemini_reply(r#"{"step": 1, "action": "Click Save"}"#))
        }
    })
    .await;

    let text = gemini(&stub.base, 3).generate(&request(), &call()).await.unwrap();
    assert!(text.contains("Click Save"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn gemini_exhaustion_is_reasoning_unavailable() {
    let stub = StubServer::start(|_| StubResponse::text(500, "boom")).await;
    let err = gemini(&stub.base, 2).generate(&request(), &call()).await.unwrap_err();
    assert!(matches!(err, BubbleError::ReasoningUnavailable { attempts: 2, .. }));
    assert_eq!(stub.count("POST", GENERATE), 2);
}

#[tokio::test]
async fn gemini_client_error_is_not_retried() {
    let stub = StubServer::start(|_| StubResponse::text(400, "API key not valid")).await;
    let err = gemini(&stub.base, 3).generate(&request(), &call()).await.unwrap_err();
    assert!(matches!(err, BubbleError::BackendStatus { status: 400, .. }));
    assert_eq!(stub.requests().len(), 1);
}

#[tokio::test]
async fn gemini_blocked_prompt_is_invalid_response() {
    let stub = StubServer::start(|_| {
        StubResponse::json(200, serde_json::json!({"promptFeedback": {"blockReason": "SAFETY"}}))
    })
    .await;
    let err = gemini(&stub.base, 3).generate(&request(), &call()).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_response");
    assert_eq!(stub.requests().len(), 1);
}

#[tokio::test]
async fn openai_compatible_round_trip() {
    let stub = StubServer::start(|req| {
        if req.header("authorization") == Some("Bearer local-key") {
            StubResponse::json(
                200,
                serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "{\"done\": true}"}}]
                }),
            )
        } else {
            StubResponse::text(400, "missing auth")
        }
    })
    .await;
    let provider = OpenAiCompatibleProvider::new(
        "local".into(),
        format!("{}/v1/chat/completions", stub.base),
        "local-key".into(),
        RetryPolicy::immediate(1),
        Duration::from_secs(5),
    )
    .unwrap();

    let text = provider.generate(&request(), &call()).await.unwrap();
    assert_eq!(text, "{\"done\": true}");
    let body = stub.requests()[0].json();
    assert_eq!(stub.requests()[0].path, "/v1/chat/completions");
    assert_eq!(body["response_format"]["type"], "json_object");
    assert_eq!(body["messages"][0]["role"], "system");
}
