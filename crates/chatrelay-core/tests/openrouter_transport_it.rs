use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;

use chatrelay_core::{
    ApiKeyPool, ChatMessage, ChatRequest, CompletionClient, CompletionError, CompletionTransport,
    KeySelection, ModelSettings, OpenRouterTransport, RetryPolicy,
};

const COMPLETION_BODY: &str = r#"{
    "id": "gen-1",
    "choices": [{"message": {"role": "assistant", "content": "Hi there"}, "finish_reason": "stop"}],
    "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
}"#;

fn request() -> ChatRequest {
    ChatRequest {
        model: "openai/gpt-3.5-turbo".to_string(),
        messages: vec![ChatMessage::user("Hello")],
        temperature: None,
        max_tokens: None,
    }
}

fn transport(server: &MockServer) -> OpenRouterTransport {
    OpenRouterTransport::new(&server.base_url(), Duration::from_secs(5))
        .expect("Transport should build against the mock server.")
}

#[tokio::test]
async fn transport_sends_bearer_key_and_parses_content() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer sk-good");
            then.status(200)
                .header("content-type", "application/json")
                .body(COMPLETION_BODY);
        })
        .await;

    let text = transport(&server)
        .complete("sk-good", &request())
        .await
        .expect("A 200 response with content should succeed.");

    assert_eq!(text, "Hi there");
    mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn transport_classifies_statuses() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).header("authorization", "Bearer sk-revoked");
            then.status(401).body("{\"error\":\"invalid key\"}");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).header("authorization", "Bearer sk-busy");
            then.status(429).body("slow down");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).header("authorization", "Bearer sk-empty");
            then.status(200)
                .header("content-type", "application/json")
                .body("{\"choices\": []}");
        })
        .await;

    let transport = transport(&server);

    let revoked = transport.complete("sk-revoked", &request()).await.unwrap_err();
    assert!(matches!(revoked, CompletionError::CredentialRejected { status: 401 }));

    let busy = transport.complete("sk-busy", &request()).await.unwrap_err();
    assert!(matches!(busy, CompletionError::RateLimited));

    let empty = transport.complete("sk-empty", &request()).await.unwrap_err();
    assert!(matches!(empty, CompletionError::Malformed(_)));
}

#[tokio::test]
async fn client_rotates_past_rejected_key_over_http() {
    let server = MockServer::start_async().await;
    let rejected = server
        .mock_async(|when, then| {
            when.method(POST).header("authorization", "Bearer sk-old");
            then.status(403);
        })
        .await;
    let accepted = server
        .mock_async(|when, then| {
            when.method(POST).header("authorization", "Bearer sk-new");
            then.status(200)
                .header("content-type", "application/json")
                .body(COMPLETION_BODY);
        })
        .await;

    let client = CompletionClient::new(
        Arc::new(transport(&server)),
        ApiKeyPool::new(["sk-old", "sk-new"], KeySelection::RoundRobin),
        RetryPolicy::each_key_once(),
        ModelSettings::default(),
    );

    let completion = client
        .complete(vec![ChatMessage::user("Hello")])
        .await
        .expect("The second key should answer.");

    assert_eq!(completion.text, "Hi there");
    assert_eq!(completion.attempts, 2);
    rejected.assert_calls_async(1).await;
    accepted.assert_calls_async(1).await;
}
