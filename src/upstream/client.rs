//! HTTP client for the Generative Language API
//!
//! Issues single `generateContent` calls and opens `streamGenerateContent`
//! SSE connections. One call here is exactly one upstream attempt; retry and
//! fallback live in the engine.

use crate::error::truncate_detail;
use crate::media::MediaItem;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single upstream attempt
#[derive(Error, Debug)]
pub enum CallError {
    #[error("upstream returned status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("upstream request failed: {0}")]
    Network(String),

    #[error("attempt timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}

impl CallError {
    /// Whether the engine may retry the same model after this failure
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Status { status, .. } => super::retry::is_retryable_status(*status),
            CallError::Network(_) | CallError::Timeout { .. } => true,
        }
    }
}

/// One part of a conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn inline(item: MediaItem) -> Self {
        Part::InlineData {
            inline_data: InlineData {
                mime_type: item.mime_type,
                data: item.data,
            },
        }
    }
}

/// Inline media payload on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// One conversation turn on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Some("model".to_string()),
            parts,
        }
    }

    /// System instruction content carries no role
    pub fn system_text(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }

    /// All text parts of this turn, joined with newlines
    pub fn text_joined(&self) -> String {
        let mut texts: Vec<&str> = Vec::new();
        for part in &self.parts {
            if let Part::Text { text } = part {
                texts.push(text);
            }
        }
        texts.join("\n")
    }
}

/// Sampling parameters forwarded upstream
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

/// Body of a generation request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub contents: Vec<Content>,
    pub generation_config: GenerationOptions,
}

impl GeneratePayload {
    pub fn new(
        system: Option<String>,
        contents: Vec<Content>,
        generation_config: GenerationOptions,
    ) -> Self {
        Self {
            system_instruction: system.map(Content::system_text),
            contents,
            generation_config,
        }
    }

    /// Same system instruction and sampling, different conversation
    pub fn with_contents(&self, contents: Vec<Content>) -> Self {
        Self {
            system_instruction: self.system_instruction.clone(),
            contents,
            generation_config: self.generation_config,
        }
    }
}

/// Parsed generation response
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub candidates: Option<Vec<Candidate>>,
    #[serde(rename = "usageMetadata")]
    pub usage_metadata: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidateContent {
    pub parts: Option<Vec<ResponsePart>>,
}

/// Response parts we care about are text; anything else is carried opaquely
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResponsePart {
    Text { text: String },
    Other(Value),
}

/// Concatenated text across all candidates and parts
///
/// An empty result means the call was safety-blocked or otherwise yielded
/// nothing usable; the engine treats that as a per-model failure.
pub fn extract_text(response: &GenerateResponse) -> String {
    let mut texts: Vec<&str> = Vec::new();
    for candidate in response.candidates.as_deref().unwrap_or(&[]) {
        let Some(content) = &candidate.content else {
            continue;
        };
        for part in content.parts.as_deref().unwrap_or(&[]) {
            if let ResponsePart::Text { text } = part {
                if !text.trim().is_empty() {
                    texts.push(text);
                }
            }
        }
    }
    texts.join("\n")
}

/// A successful reply, parsed and raw
///
/// The raw value is kept because callers may ask for the unmodified upstream
/// body in the response envelope.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub parsed: GenerateResponse,
    pub raw: Value,
}

/// Client for the upstream generative API
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl UpstreamClient {
    pub fn new(base_url: &str, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        )
    }

    /// Single non-streaming generation attempt
    pub async fn generate(
        &self,
        model: &str,
        payload: &GeneratePayload,
        timeout: Duration,
    ) -> Result<UpstreamReply, CallError> {
        let response = self
            .http
            .post(self.generate_url(model))
            .header("x-goog-api-key", &self.api_key)
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Status {
                status: status.as_u16(),
                detail: summarize_error_body(&body),
            });
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| classify_transport_error(e, timeout))?;
        let parsed: GenerateResponse = serde_json::from_value(raw.clone())
            .map_err(|e| CallError::Network(format!("unexpected response shape: {e}")))?;

        Ok(UpstreamReply { parsed, raw })
    }

    /// Open a streaming generation attempt
    ///
    /// `connect_timeout` bounds connection establishment and the response
    /// headers only; once the stream is open, chunks flow until the upstream
    /// closes it. Each item is the data payload of one SSE event, forwarded
    /// without re-interpretation.
    pub async fn stream_generate(
        &self,
        model: &str,
        payload: &GeneratePayload,
        connect_timeout: Duration,
    ) -> Result<BoxStream<'static, Result<String, CallError>>, CallError> {
        let request = self
            .http
            .post(self.stream_url(model))
            .header("x-goog-api-key", &self.api_key)
            .json(payload)
            .send();

        let response = tokio::time::timeout(connect_timeout, request)
            .await
            .map_err(|_| CallError::Timeout {
                timeout_ms: connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| classify_transport_error(e, connect_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Status {
                status: status.as_u16(),
                detail: summarize_error_body(&body),
            });
        }

        Ok(sse_frames(response.bytes_stream()).boxed())
    }
}

fn classify_transport_error(error: reqwest::Error, timeout: Duration) -> CallError {
    if error.is_timeout() {
        CallError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        CallError::Network(error.to_string())
    }
}

/// Extract a short human-readable detail from an upstream error body
pub fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(message) = value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .and_then(Value::as_str)
        {
            return truncate_detail(message);
        }
    }

    truncate_detail(trimmed)
}

/// Split a byte stream into SSE data payloads
///
/// Buffers until a blank-line frame boundary, then yields the joined
/// `data:` lines of the frame. Comments and other fields are skipped. A
/// trailing unterminated frame is flushed when the connection closes.
fn sse_frames<S, B, E>(inner: S) -> impl Stream<Item = Result<String, CallError>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let inner = Box::pin(inner);
    futures::stream::unfold(
        (inner, String::new(), false),
        |(mut inner, mut buffer, mut closed)| async move {
            loop {
                if let Some(boundary) = buffer.find("\n\n") {
                    let frame: String = buffer.drain(..boundary + 2).collect();
                    if let Some(data) = parse_sse_frame(&frame) {
                        return Some((Ok(data), (inner, buffer, closed)));
                    }
                    continue;
                }

                if closed {
                    if !buffer.trim().is_empty() {
                        let rest = std::mem::take(&mut buffer);
                        if let Some(data) = parse_sse_frame(&rest) {
                            return Some((Ok(data), (inner, buffer, closed)));
                        }
                    }
                    return None;
                }

                match inner.next().await {
                    Some(Ok(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(bytes.as_ref()));
                        // Normalize CRLF so frame detection only looks for \n\n
                        if buffer.contains('\r') {
                            buffer = buffer.replace("\r\n", "\n");
                        }
                    }
                    Some(Err(e)) => {
                        closed = true;
                        return Some((
                            Err(CallError::Network(e.to_string())),
                            (inner, buffer, closed),
                        ));
                    }
                    None => closed = true,
                }
            }
        },
    )
}

fn parse_sse_frame(frame: &str) -> Option<String> {
    let mut data_lines: Vec<&str> = Vec::new();
    for line in frame.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    let data = data_lines.join("\n");
    if data.trim().is_empty() || data.trim() == "[DONE]" {
        return None;
    }
    Some(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_serializes_to_camel_case_wire_shape() {
        let payload = GeneratePayload::new(
            Some("be helpful".to_string()),
            vec![Content::user(vec![
                Part::text("hello"),
                Part::inline(MediaItem {
                    mime_type: "image/png".to_string(),
                    data: "aGVsbG8=".to_string(),
                }),
            ])],
            GenerationOptions {
                temperature: 0.7,
                top_p: 0.95,
                max_output_tokens: 1024,
            },
        );

        let wire = serde_json::to_value(&payload).expect("serializes");
        assert_eq!(wire["systemInstruction"]["parts"][0]["text"], "be helpful");
        assert!(wire["systemInstruction"].get("role").is_none());
        assert_eq!(wire["contents"][0]["role"], "user");
        assert_eq!(wire["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(
            wire["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
        assert_eq!(wire["generationConfig"]["topP"], 0.95);
        assert_eq!(wire["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn extract_text_joins_parts_across_candidates() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "parts": [ { "text": "first" }, { "text": "second" } ] } }
            ]
        }))
        .unwrap();
        assert_eq!(extract_text(&response), "first\nsecond");
    }

    #[test]
    fn extract_text_skips_non_text_parts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "parts": [
                    { "inlineData": { "mimeType": "image/png", "data": "aGVsbG8=" } },
                    { "text": "caption" }
                ] } }
            ]
        }))
        .unwrap();
        assert_eq!(extract_text(&response), "caption");
    }

    #[test]
    fn extract_text_empty_for_blocked_response() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [ { "finishReason": "SAFETY" } ]
        }))
        .unwrap();
        assert_eq!(extract_text(&response), "");

        let response: GenerateResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(extract_text(&response), "");
    }

    #[test]
    fn error_body_summary_prefers_error_message() {
        let body = r#"{"error": {"code": 429, "message": "Resource exhausted", "status": "RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(summarize_error_body(body), "Resource exhausted");

        assert_eq!(summarize_error_body("   "), "empty response body");
        assert_eq!(summarize_error_body("plain failure"), "plain failure");
    }

    #[test]
    fn status_error_retryability() {
        let rate_limited = CallError::Status {
            status: 429,
            detail: String::new(),
        };
        assert!(rate_limited.is_retryable());

        let server_error = CallError::Status {
            status: 500,
            detail: String::new(),
        };
        assert!(server_error.is_retryable());

        let bad_request = CallError::Status {
            status: 400,
            detail: String::new(),
        };
        assert!(!bad_request.is_retryable());

        assert!(CallError::Network("reset".to_string()).is_retryable());
        assert!(CallError::Timeout { timeout_ms: 1000 }.is_retryable());
    }

    #[tokio::test]
    async fn sse_frames_split_on_blank_lines() {
        let chunks: Vec<Result<&[u8], std::convert::Infallible>> = vec![
            Ok(b"data: {\"a\":1}\n\nda".as_slice()),
            Ok(b"ta: {\"b\":2}\n\n".as_slice()),
        ];
        let frames: Vec<_> = sse_frames(futures::stream::iter(chunks))
            .collect::<Vec<_>>()
            .await;

        let texts: Vec<String> = frames.into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(texts, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn sse_frames_flush_unterminated_tail() {
        let chunks: Vec<Result<&[u8], std::convert::Infallible>> =
            vec![Ok(b"data: {\"tail\":true}".as_slice())];
        let frames: Vec<_> = sse_frames(futures::stream::iter(chunks))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), "{\"tail\":true}");
    }

    #[tokio::test]
    async fn sse_frames_skip_comments_and_done_marker() {
        let chunks: Vec<Result<&[u8], std::convert::Infallible>> = vec![Ok(
            b": keep-alive\n\ndata: {\"a\":1}\n\ndata: [DONE]\n\n".as_slice(),
        )];
        let frames: Vec<_> = sse_frames(futures::stream::iter(chunks))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn sse_frames_handle_crlf() {
        let chunks: Vec<Result<&[u8], std::convert::Infallible>> =
            vec![Ok(b"data: {\"a\":1}\r\n\r\n".as_slice())];
        let frames: Vec<_> = sse_frames(futures::stream::iter(chunks))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), "{\"a\":1}");
    }
}
