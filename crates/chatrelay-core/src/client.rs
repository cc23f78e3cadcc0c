//! OpenRouter-compatible chat completions client with key rotation.
//!
//! The wire call lives behind [`CompletionTransport`] so the rotation loop in
//! [`CompletionClient`] can be driven by a scripted transport in tests.
//!
//! - [`OpenRouterTransport`]: one POST to `{base}/chat/completions` with a
//!   bearer key
//! - [`CompletionClient`]: picks keys from the [`ApiKeyPool`], applies the
//!   [`RetryPolicy`] and updates per-key counters

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{CompletionError, Result};
use crate::keys::{ApiKeyPool, KeyStats};
use crate::retry::RetryPolicy;
use crate::session::{Role, Turn};

/// Default OpenRouter API base.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";

/// Attribution headers OpenRouter shows on its dashboard.
const REFERER: &str = "https://github.com/chatrelay/chatrelay";
const TITLE: &str = "chatrelay";

/// Chat completion request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,

    /// Conversation messages, oldest first.
    pub messages: Vec<ChatMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A `{role, content}` pair on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    /// Convert a stored history turn.
    pub fn from_turn(turn: &Turn) -> Self {
        match turn.role {
            Role::System => Self::system(&turn.content),
            Role::User => Self::user(&turn.content),
            Role::Assistant => Self::assistant(&turn.content),
        }
    }
}

/// Chat completion response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: Option<String>,

    pub choices: Vec<ChatChoice>,

    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

impl ChatResponse {
    /// Text of `choices[0].message.content`, if present and non-blank.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ResponseMessage,

    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,

    pub content: Option<String>,
}

/// Token usage information. Providers may report only some of the counts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One completion call with one credential.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Send `request` authorized by `api_key` and return the reply text.
    async fn complete(&self, api_key: &str, request: &ChatRequest) -> Result<String>;
}

/// reqwest-backed transport for OpenRouter and compatible APIs.
#[derive(Clone)]
pub struct OpenRouterTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl OpenRouterTransport {
    /// Create a transport for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionTransport for OpenRouterTransport {
    async fn complete(&self, api_key: &str, request: &ChatRequest) -> Result<String> {
        trace!(model = %request.model, messages = request.messages.len(), "Sending chat request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::from_status(status.as_u16(), body));
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| CompletionError::Malformed(format!("failed to parse response: {}", e)))?;

        debug!(
            id = ?parsed.id,
            tokens = parsed.usage.as_ref().map_or(0, |u| u.total_tokens),
            "Chat response received"
        );

        parsed
            .text()
            .map(str::to_string)
            .ok_or_else(|| CompletionError::Malformed("no content in choices[0].message".to_string()))
    }
}

/// Model parameters sent with every request.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            max_tokens: None,
        }
    }
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Pool index of the key that answered.
    pub key_index: usize,
    /// Attempts made, including the successful one.
    pub attempts: usize,
}

/// Rotates credentials across attempts according to a [`RetryPolicy`].
pub struct CompletionClient {
    transport: Arc<dyn CompletionTransport>,
    keys: Mutex<ApiKeyPool>,
    policy: RetryPolicy,
    settings: ModelSettings,
}

impl CompletionClient {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        keys: ApiKeyPool,
        policy: RetryPolicy,
        settings: ModelSettings,
    ) -> Self {
        Self {
            transport,
            keys: Mutex::new(keys),
            policy,
            settings,
        }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Per-key counters, in pool order.
    pub async fn key_stats(&self) -> Vec<KeyStats> {
        self.keys.lock().await.stats().to_vec()
    }

    /// Run one completion, rotating keys on failure.
    ///
    /// The pool lock is released while the request is in flight.
    pub async fn complete(&self, messages: Vec<ChatMessage>) -> Result<Completion> {
        let key_count = self.keys.lock().await.len();
        if key_count == 0 {
            return Err(CompletionError::NoKeys);
        }

        let budget = self.policy.attempts_for(key_count).max(1);
        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let mut tried: Vec<usize> = Vec::with_capacity(key_count);
        let mut attempts = 0;

        loop {
            if tried.len() == key_count {
                tried.clear();
            }
            let selected = self
                .keys
                .lock()
                .await
                .next_key(&tried)
                .ok_or(CompletionError::NoKeys)?;
            tried.push(selected.index);
            attempts += 1;

            match self.transport.complete(&selected.key, &request).await {
                Ok(text) => {
                    self.keys.lock().await.record_success(selected.index);
                    debug!(key_index = selected.index, attempts, "Completion succeeded");
                    return Ok(Completion {
                        text,
                        key_index: selected.index,
                        attempts,
                    });
                }
                Err(err) => {
                    self.keys.lock().await.record_failure(selected.index);
                    warn!(
                        key_index = selected.index,
                        attempt = attempts,
                        budget,
                        error = %err,
                        "Completion attempt failed"
                    );

                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if !self.policy.should_retry(&err, attempts, budget) {
                        return Err(CompletionError::Exhausted {
                            attempts,
                            last: Box::new(err),
                        });
                    }

                    let delay = self.policy.delay_after(&err, attempts);
                    if !delay.is_zero() {
                        debug!(delay_ms = delay.as_millis() as u64, "Backing off before next key");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport shared by the client and relay tests.

    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use super::*;

    /// Replays a queue of outcomes and records the key used for each call.
    #[derive(Default)]
    pub struct ScriptedTransport {
        outcomes: StdMutex<VecDeque<Result<String>>>,
        calls: StdMutex<Vec<(String, ChatRequest)>>,
    }

    impl ScriptedTransport {
        pub fn new(outcomes: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: StdMutex::new(outcomes.into()),
                calls: StdMutex::new(Vec::new()),
            })
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn keys_used(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
        }

        pub fn last_request(&self) -> Option<ChatRequest> {
            self.calls.lock().unwrap().last().map(|(_, r)| r.clone())
        }
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        async fn complete(&self, api_key: &str, request: &ChatRequest) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((api_key.to_string(), request.clone()));
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CompletionError::Transport("script exhausted".to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;
    use crate::keys::KeySelection;
    use crate::retry::AttemptLimit;

    fn rejected() -> Result<String> {
        Err(CompletionError::CredentialRejected { status: 401 })
    }

    fn client(transport: Arc<ScriptedTransport>, keys: &[&str], policy: RetryPolicy) -> CompletionClient {
        CompletionClient::new(
            transport,
            ApiKeyPool::new(keys.iter().copied(), KeySelection::RoundRobin),
            policy,
            ModelSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_last_key_answers_after_rejections() {
        let transport = ScriptedTransport::new(vec![
            rejected(),
            rejected(),
            rejected(),
            Ok("from key four".to_string()),
        ]);
        let client = client(
            transport.clone(),
            &["k1", "k2", "k3", "k4"],
            RetryPolicy::each_key_once(),
        );

        let completion = client.complete(vec![ChatMessage::user("hi")]).await.unwrap();

        assert_eq!(completion.text, "from key four");
        assert_eq!(completion.key_index, 3);
        assert_eq!(completion.attempts, 4);
        assert_eq!(transport.call_count(), 4);
        assert_eq!(transport.keys_used(), vec!["k1", "k2", "k3", "k4"]);

        let stats = client.key_stats().await;
        assert_eq!(stats[0].errors, 1);
        assert_eq!(stats[3].successes, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let transport = ScriptedTransport::new(vec![rejected(), rejected()]);
        let client = client(transport.clone(), &["k1", "k2"], RetryPolicy::each_key_once());

        let err = client.complete(vec![ChatMessage::user("hi")]).await.unwrap_err();

        match err {
            CompletionError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, CompletionError::CredentialRejected { status: 401 }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fixed_attempts_wrap_around_keys() {
        let transport = ScriptedTransport::new(vec![
            Err(CompletionError::Malformed("empty".to_string())),
            Err(CompletionError::Malformed("empty".to_string())),
            Ok("third time".to_string()),
        ]);
        let policy = RetryPolicy::default()
            .with_max_attempts(AttemptLimit::Fixed(3))
            .with_initial_backoff(Duration::ZERO);
        let client = client(transport.clone(), &["k1", "k2"], policy);

        let completion = client.complete(vec![ChatMessage::user("hi")]).await.unwrap();

        assert_eq!(completion.attempts, 3);
        assert_eq!(transport.keys_used(), vec!["k1", "k2", "k1"]);
    }

    #[tokio::test]
    async fn test_cursor_persists_across_requests() {
        let transport = ScriptedTransport::new(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let client = client(transport.clone(), &["k1", "k2"], RetryPolicy::each_key_once());

        client.complete(vec![ChatMessage::user("one")]).await.unwrap();
        client.complete(vec![ChatMessage::user("two")]).await.unwrap();

        assert_eq!(transport.keys_used(), vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn test_no_keys_is_terminal() {
        let transport = ScriptedTransport::new(vec![]);
        let client = client(transport.clone(), &[], RetryPolicy::default());

        let err = client.complete(vec![ChatMessage::user("hi")]).await.unwrap_err();

        assert!(matches!(err, CompletionError::NoKeys));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_request_carries_model_settings() {
        let transport = ScriptedTransport::new(vec![Ok("ok".to_string())]);
        let client = CompletionClient::new(
            transport.clone(),
            ApiKeyPool::new(["k1"], KeySelection::RoundRobin),
            RetryPolicy::default(),
            ModelSettings {
                model: "anthropic/claude-3-haiku".to_string(),
                temperature: Some(0.2),
                max_tokens: Some(256),
            },
        );

        client.complete(vec![ChatMessage::user("hi")]).await.unwrap();

        let request = transport.last_request().unwrap();
        assert_eq!(request.model, "anthropic/claude-3-haiku");
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(256));
    }

    #[test]
    fn test_request_serialization_skips_unset_fields() {
        let request = ChatRequest {
            model: DEFAULT_MODEL.to_string(),
            messages: vec![ChatMessage::system("Be brief."), ChatMessage::user("Hello")],
            temperature: None,
            max_tokens: None,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], DEFAULT_MODEL);
        assert_eq!(json["messages"][1]["role"], "user");
        assert!(json.get("temperature").is_none());
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_response_text_extraction() {
        let json = r#"{
            "id": "gen-123",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello! How can I help?"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;

        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.text(), Some("Hello! How can I help?"));
    }

    #[test]
    fn test_partial_usage_still_parses() {
        let json = r#"{"choices":[{"message":{"content":"ok"}}],"usage":{"total_tokens":5}}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.text(), Some("ok"));

        let usage = response.usage.unwrap();
        assert_eq!(usage.total_tokens, 5);
        assert_eq!(usage.prompt_tokens, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limits_back_off_between_keys() {
        let transport = ScriptedTransport::new(vec![
            Err(CompletionError::RateLimited),
            Err(CompletionError::RateLimited),
            Ok("finally".to_string()),
        ]);
        let policy = RetryPolicy::default();
        let client = client(transport.clone(), &["k1", "k2", "k3"], policy.clone());

        let started = tokio::time::Instant::now();
        let completion = client.complete(vec![ChatMessage::user("hi")]).await.unwrap();

        assert_eq!(completion.attempts, 3);
        assert_eq!(started.elapsed(), policy.backoff(1) + policy.backoff(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_keys_rotate_without_waiting() {
        let transport = ScriptedTransport::new(vec![
            rejected(),
            rejected(),
            Ok("finally".to_string()),
        ]);
        let client = client(transport.clone(), &["k1", "k2", "k3"], RetryPolicy::default());

        let started = tokio::time::Instant::now();
        client.complete(vec![ChatMessage::user("hi")]).await.unwrap();

        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_response_without_content() {
        let json = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.text(), None);

        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert_eq!(empty.text(), None);
    }
}
