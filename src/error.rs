//! Error types for Wasit
//!
//! All errors implement `IntoResponse` for Axum handlers. The status mapping
//! encodes the failure taxonomy: input errors are 4xx and never retried,
//! media rejection escalates to 413, upstream rate limiting passes through
//! as 429, empty or failed completions surface as 502, and deadline
//! exhaustion as 504.

use crate::media::MediaRejection;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Maximum number of characters of upstream detail included in envelopes.
pub const ERROR_DETAIL_LIMIT: usize = 600;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config file {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Upstream API credential is not configured")]
    MissingCredential,

    #[error("all supplied media items were rejected")]
    MediaRejected(Vec<MediaRejection>),

    #[error("upstream returned status {status}: {detail}")]
    UpstreamStatus { status: u16, detail: String },

    #[error("model {model} produced no usable text")]
    EmptyCompletion { model: String },

    #[error("upstream request failed: {0}")]
    UpstreamNetwork(String),

    #[error("request deadline exhausted before a completion was produced")]
    DeadlineExhausted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this failure class
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::MediaRejected(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UpstreamStatus { status: 429, .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamStatus { .. } | Self::EmptyCompletion { .. } => StatusCode::BAD_GATEWAY,
            Self::DeadlineExhausted => StatusCode::GATEWAY_TIMEOUT,
            Self::MissingCredential
            | Self::UpstreamNetwork(_)
            | Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error kind for the outbound envelope
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_request",
            Self::MediaRejected(_) => "media_rejected",
            Self::UpstreamStatus { status: 429, .. } => "rate_limited",
            Self::UpstreamStatus { .. } => "upstream_error",
            Self::EmptyCompletion { .. } => "empty_completion",
            Self::DeadlineExhausted => "timeout",
            Self::MissingCredential => "server_config",
            Self::UpstreamNetwork(_) => "network",
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. } => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Human-readable (or structured, for media rejections) detail payload
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::MediaRejected(rejections) => serde_json::to_value(rejections).ok(),
            other => Some(serde_json::Value::String(truncate_detail(
                &other.to_string(),
            ))),
        }
    }
}

/// Truncate a detail string to [`ERROR_DETAIL_LIMIT`] characters.
///
/// Upstream error bodies can be arbitrarily large; envelopes and logs carry
/// at most this much of them.
pub fn truncate_detail(detail: &str) -> String {
    if detail.chars().count() <= ERROR_DETAIL_LIMIT {
        return detail.to_string();
    }
    let truncated: String = detail.chars().take(ERROR_DETAIL_LIMIT).collect();
    format!("{truncated}... (truncated)")
}

/// Outbound error envelope
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<&'static str>,
}

impl ErrorBody {
    /// Build an envelope from an error, annotated with request identity
    pub fn from_error(
        err: &AppError,
        request_id: Option<String>,
        lang: Option<&'static str>,
    ) -> Self {
        Self {
            error: err.kind().to_string(),
            details: err.details(),
            request_id,
            lang,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody::from_error(&self, None, None);
        (status, Json(body)).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
