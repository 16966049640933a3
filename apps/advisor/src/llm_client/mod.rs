/// LLM Client — the single point of entry for chat-completion calls.
///
/// ARCHITECTURAL RULE: the conversation controller only ever sees the
/// `LlmCollaborator` trait. `OpenRouterClient` is the HTTP implementation for
/// OpenRouter and any other OpenAI-compatible `/chat/completions` endpoint.
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmConfig;

/// A failed round-trip to the LLM endpoint.
///
/// `status` is `None` when no HTTP response was received (network failure,
/// timeout). Successful HTTP responses whose envelope cannot be read carry the
/// success status and a description of what was wrong with the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("LLM request failed ({}): {}", describe_status(.status), .body)]
pub struct TransportError {
    pub status: Option<u16>,
    pub body: String,
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "no response".to_string(),
    }
}

impl TransportError {
    pub fn new(status: Option<u16>, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::new(None, format!("request timed out after {}s", after.as_secs_f64()))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if err.is_timeout() {
            return Self::new(status, format!("request timed out: {err}"));
        }
        Self::new(status, err.to_string())
    }
}

/// The opaque completion capability the conversation controller depends on.
#[async_trait]
pub trait LlmCollaborator: Send + Sync {
    /// Sends a system instruction plus a single user message and returns the
    /// assistant's raw text.
    async fn complete(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, TransportError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ChatResponse {
    /// Takes the content of the first choice.
    pub fn into_text(self) -> Option<String> {
        self.choices.into_iter().next().and_then(|c| c.message.content)
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Pause before retry number `attempt` (1-based): 1s, 2s, 4s, ... capped at 64s.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(1000 * (1u64 << attempt.saturating_sub(1).min(6)))
}

/// Chat-completion client for OpenRouter-style endpoints.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_retries: u32,
}

impl OpenRouterClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmCollaborator for OpenRouterClient {
    /// Retries 408/429/5xx and network failures up to `max_retries` times with
    /// exponential backoff. Everything else is returned on the first failure.
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, TransportError> {
        let request_body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let mut last_error: Option<TransportError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(TransportError::from(e));
                    continue;
                }
            };

            let status = response.status().as_u16();
            let body = response.text().await.map_err(TransportError::from)?;

            if !(200..300).contains(&status) {
                let error = TransportError::new(Some(status), extract_error_message(body));
                if is_retryable_status(status) {
                    warn!("LLM API returned {}: {}", status, error.body);
                    last_error = Some(error);
                    continue;
                }
                return Err(error);
            }

            return parse_completion(status, &body);
        }

        Err(last_error.unwrap_or_else(|| TransportError::new(None, "no request was sent")))
    }
}

/// Unwraps the OpenAI-style `{"error": {"message": ...}}` envelope, falling
/// back to the raw body.
fn extract_error_message(body: String) -> String {
    serde_json::from_str::<ApiError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body)
}

/// Reads a 2xx chat-completion envelope down to the first choice's content.
fn parse_completion(status: u16, body: &str) -> Result<String, TransportError> {
    let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
        TransportError::new(Some(status), format!("malformed completion envelope: {e}"))
    })?;

    if let Some(usage) = &response.usage {
        debug!(
            "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
            usage.prompt_tokens, usage.completion_tokens
        );
    }

    response.into_text().ok_or_else(|| {
        TransportError::new(Some(status), "completion contained no message content")
    })
}

#[cfg(test)]
pub mod testing {
    //! Scripted collaborator used by controller, chat and handler tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, TransportError>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedLlm {
        pub fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
        }

        pub fn with_results<I>(results: I) -> Self
        where
            I: IntoIterator<Item = Result<String, TransportError>>,
        {
            Self {
                replies: Mutex::new(results.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Every `(system_prompt, user_prompt)` pair received so far.
        pub fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmCollaborator for ScriptedLlm {
        async fn complete(
            &self,
            system_prompt: &str,
            user_prompt: &str,
        ) -> Result<String, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), user_prompt.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::new(None, "script exhausted")))
        }
    }

    /// Never answers; for timeout and cancellation tests.
    pub struct HangingLlm;

    #[async_trait]
    impl LlmCollaborator for HangingLlm {
        async fn complete(&self, _: &str, _: &str) -> Result<String, TransportError> {
            std::future::pending().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_takes_first_choice() {
        let body = r#"{
            "choices": [
                {"message": {"role": "assistant", "content": "{\"clarify\": \"Why?\"}"}},
                {"message": {"role": "assistant", "content": "ignored"}}
            ],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7}
        }"#;
        assert_eq!(parse_completion(200, body).unwrap(), r#"{"clarify": "Why?"}"#);
    }

    #[test]
    fn test_parse_completion_without_usage() {
        let body = r#"{"choices": [{"message": {"content": "hello"}}]}"#;
        assert_eq!(parse_completion(200, body).unwrap(), "hello");
    }

    #[test]
    fn test_parse_completion_empty_choices_is_transport_error() {
        let err = parse_completion(200, r#"{"choices": []}"#).unwrap_err();
        assert_eq!(err.status, Some(200));
        assert!(err.body.contains("no message content"));
    }

    #[test]
    fn test_parse_completion_null_content_is_transport_error() {
        let err = parse_completion(200, r#"{"choices": [{"message": {"content": null}}]}"#)
            .unwrap_err();
        assert!(err.body.contains("no message content"));
    }

    #[test]
    fn test_parse_completion_malformed_envelope() {
        let err = parse_completion(200, "<html>gateway</html>").unwrap_err();
        assert_eq!(err.status, Some(200));
        assert!(err.body.starts_with("malformed completion envelope"));
    }

    #[test]
    fn test_extract_error_message_from_envelope() {
        let body = r#"{"error": {"message": "Invalid API key", "code": 401}}"#.to_string();
        assert_eq!(extract_error_message(body), "Invalid API key");
    }

    #[test]
    fn test_extract_error_message_falls_back_to_raw_body() {
        assert_eq!(extract_error_message("Bad Gateway".to_string()), "Bad Gateway");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::new(Some(401), "Invalid API key");
        assert_eq!(err.to_string(), "LLM request failed (status 401): Invalid API key");

        let err = TransportError::timed_out(Duration::from_secs(30));
        assert_eq!(err.status, None);
        assert_eq!(
            err.to_string(),
            "LLM request failed (no response): request timed out after 30s"
        );
    }

    #[test]
    fn test_request_serializes_system_then_user() {
        let request = ChatRequest {
            model: "m",
            messages: [
                ChatMessage {
                    role: "system",
                    content: "sys",
                },
                ChatMessage {
                    role: "user",
                    content: "Conversation: hi",
                },
            ],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "m");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "Conversation: hi");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(20), Duration::from_secs(64));
    }

    // ── HTTP behaviour against a local completions endpoint ──

    mod http {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::time::Duration;

        use axum::{
            http::{header::AUTHORIZATION, HeaderMap, StatusCode},
            routing::post,
            Router,
        };

        use crate::advisor::controller::{
            ControllerOptions, ConversationController, SessionOutcome,
        };
        use crate::advisor::session::ConversationSession;
        use crate::config::LlmConfig;
        use crate::llm_client::{LlmCollaborator, OpenRouterClient, TransportError};

        const COMPLETION: &str =
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"clarify\":\"Why?\"}"}}]}"#;
        const OVERLOADED: &str = r#"{"error":{"message":"overloaded"}}"#;

        /// Serves the scripted `(status, body)` replies in order, repeating the
        /// last one. Returns the base URL and a hit counter.
        async fn serve_replies(
            replies: Vec<(StatusCode, &'static str)>,
        ) -> (String, Arc<AtomicUsize>) {
            let hits = Arc::new(AtomicUsize::new(0));
            let counter = hits.clone();
            let replies = Arc::new(replies);

            let app = Router::new().route(
                "/v1/chat/completions",
                post(move |headers: HeaderMap| {
                    let counter = counter.clone();
                    let replies = replies.clone();
                    async move {
                        let hit = counter.fetch_add(1, Ordering::SeqCst);
                        let authorized = headers
                            .get(AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            == Some("Bearer sk-test");
                        if !authorized {
                            return (
                                StatusCode::UNAUTHORIZED,
                                r#"{"error":{"message":"bad key"}}"#,
                            );
                        }
                        replies[hit.min(replies.len() - 1)]
                    }
                }),
            );

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            (format!("http://{addr}/v1"), hits)
        }

        fn llm_config(base_url: String, max_retries: u32) -> LlmConfig {
            LlmConfig {
                api_key: "sk-test".to_string(),
                base_url,
                model: "test-model".to_string(),
                timeout: Duration::from_secs(1),
                max_retries,
            }
        }

        #[tokio::test]
        async fn test_transient_status_is_retried_within_request_timeout() {
            let (base_url, hits) = serve_replies(vec![
                (StatusCode::SERVICE_UNAVAILABLE, OVERLOADED),
                (StatusCode::OK, COMPLETION),
            ])
            .await;
            let config = llm_config(base_url, 1);
            let controller = ConversationController::new(
                Arc::new(OpenRouterClient::new(&config).unwrap()),
                ControllerOptions {
                    request_timeout: config.call_budget(),
                    ..ControllerOptions::default()
                },
            );
            let mut session = ConversationSession::new();

            let outcome = controller.submit(&mut session, "hi").await;

            assert_eq!(outcome, SessionOutcome::Clarify("Why?".to_string()));
            assert_eq!(hits.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn test_non_retryable_status_fails_on_first_attempt() {
            let (base_url, hits) = serve_replies(vec![(
                StatusCode::BAD_REQUEST,
                r#"{"error":{"message":"Invalid model"}}"#,
            )])
            .await;
            let client = OpenRouterClient::new(&llm_config(base_url, 2)).unwrap();

            let err = client.complete("sys", "Conversation: hi").await.unwrap_err();

            assert_eq!(err, TransportError::new(Some(400), "Invalid model"));
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_exhausted_retries_keep_upstream_status() {
            let (base_url, hits) =
                serve_replies(vec![(StatusCode::SERVICE_UNAVAILABLE, OVERLOADED)]).await;
            let client = OpenRouterClient::new(&llm_config(base_url, 0)).unwrap();

            let err = client.complete("sys", "Conversation: hi").await.unwrap_err();

            assert_eq!(err, TransportError::new(Some(503), "overloaded"));
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_bearer_key_is_sent() {
            let (base_url, _) = serve_replies(vec![(StatusCode::OK, COMPLETION)]).await;
            let mut config = llm_config(base_url, 0);
            config.api_key = "sk-wrong".to_string();
            let client = OpenRouterClient::new(&config).unwrap();

            let err = client.complete("sys", "Conversation: hi").await.unwrap_err();

            assert_eq!(err, TransportError::new(Some(401), "bad key"));
        }
    }
}
