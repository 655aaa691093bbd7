//! Shared helpers for integration tests
#![allow(dead_code)]

use axum::http::StatusCode;
use axum::{Extension, Json, extract::State};
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use wasit::config::Config;
use wasit::handlers::{AppState, complete};
use wasit::middleware::RequestId;

/// Build an AppState pointed at the given upstream base URL
///
/// Retry tuning is fast (1 ms base backoff, no jitter) so exhaustion tests
/// finish quickly.
pub fn test_state(base_url: &str) -> AppState {
    let toml = format!(
        r#"
[server]
host = "127.0.0.1"
port = 0

[upstream]
base_url = "{base_url}"
api_key_env = "WASIT_TEST_KEY"

[models]
pool = ["model-a", "model-b"]

[retry]
max_attempts = 3
base_backoff_ms = 1
max_jitter_ms = 0

[generation]
temperature = 0.7
top_p = 0.95
max_output_tokens = 1024
timeout_ms = 20000
"#
    );
    let config = Config::from_str(&toml).expect("test config should parse");
    AppState::with_api_key(Arc::new(config), Some("test-key".to_string()))
        .expect("test state should build")
}

/// Same state, but without an upstream credential
pub fn test_state_without_key(base_url: &str) -> AppState {
    let toml = format!(
        r#"
[server]
host = "127.0.0.1"
port = 0

[upstream]
base_url = "{base_url}"

[models]
pool = ["model-a"]
"#
    );
    let config = Config::from_str(&toml).expect("test config should parse");
    AppState::with_api_key(Arc::new(config), None).expect("test state should build")
}

/// Invoke the completion handler directly and decode the JSON body
pub async fn call(state: &AppState, body: Value) -> (StatusCode, Value) {
    let request: complete::CompletionRequest =
        serde_json::from_value(body).expect("request JSON should deserialize");
    let response = complete::handler(
        State(state.clone()),
        Extension(RequestId::new()),
        Json(request),
    )
    .await;

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Invoke the completion handler and return the raw body as text
///
/// Used by streaming tests where the body is an SSE event stream rather
/// than a JSON document.
pub async fn call_raw(state: &AppState, body: Value) -> (StatusCode, String, String) {
    let request: complete::CompletionRequest =
        serde_json::from_value(body).expect("request JSON should deserialize");
    let response = complete::handler(
        State(state.clone()),
        Extension(RequestId::new()),
        Json(request),
    )
    .await;

    let status = response.status();
    let content_type = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    (status, content_type, String::from_utf8_lossy(&bytes).into_owned())
}

/// A well-formed upstream generation response carrying `text`
pub fn completion_body(text: &str) -> Value {
    json!({
        "candidates": [
            {
                "content": { "role": "model", "parts": [ { "text": text } ] },
                "finishReason": "STOP"
            }
        ],
        "usageMetadata": {
            "promptTokenCount": 5,
            "candidatesTokenCount": 7,
            "totalTokenCount": 12
        }
    })
}

/// An upstream response with no candidates at all (safety-blocked shape)
pub fn empty_body() -> Value {
    json!({ "promptFeedback": { "blockReason": "SAFETY" } })
}
