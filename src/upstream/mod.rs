//! Upstream call engine
//!
//! Walks the ordered candidate models for one request. Each model gets a
//! bounded retry loop with exponential backoff and jitter; transient
//! failures (rate limiting, 5xx, network errors, per-attempt timeouts) are
//! retried, anything else advances to the next candidate immediately. A
//! successful call that yields no usable text is a semantic failure and also
//! advances. Only after the last candidate fails is an error surfaced, built
//! from the most recent failure.
//!
//! The whole walk shares one deadline: the caller's time budget is checked
//! before every attempt and before every backoff sleep.

pub mod client;
pub mod retry;

use crate::error::AppError;
use crate::metrics::{AttemptResult, Metrics};
use crate::middleware::RequestId;
use client::{CallError, GeneratePayload, UpstreamClient, extract_text};
use futures::stream::BoxStream;
use retry::RetryPolicy;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum useful remaining budget for one more attempt, in milliseconds
const MIN_ATTEMPT_BUDGET_MS: u64 = 250;

/// Result of a successful engine run
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub text: String,
    pub model: String,
    pub usage: Option<Value>,
    pub raw: Option<Value>,
}

/// The most recent failure observed while walking candidates
enum LastFailure {
    Call { error: CallError },
    Empty { model: String },
    OutOfTime,
}

fn exhaustion_error(last: Option<LastFailure>) -> AppError {
    match last {
        Some(LastFailure::OutOfTime) => AppError::DeadlineExhausted,
        Some(LastFailure::Empty { model }) => AppError::EmptyCompletion { model },
        Some(LastFailure::Call { error }) => match error {
            CallError::Status { status, detail } => AppError::UpstreamStatus { status, detail },
            CallError::Timeout { .. } => AppError::DeadlineExhausted,
            CallError::Network(detail) => AppError::UpstreamNetwork(detail),
        },
        None => AppError::Internal("candidate model list was empty".to_string()),
    }
}

/// Run the non-streaming generation path across the candidate pool
pub async fn generate_with_fallback(
    upstream: &UpstreamClient,
    candidates: &[String],
    payload: &GeneratePayload,
    policy: &RetryPolicy,
    deadline: Instant,
    request_id: RequestId,
    metrics: &Metrics,
) -> Result<EngineOutcome, AppError> {
    let mut last: Option<LastFailure> = None;

    'candidates: for (index, model) in candidates.iter().enumerate() {
        if index > 0 {
            metrics.record_fallback();
        }

        for attempt in 1..=policy.max_attempts() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining < Duration::from_millis(MIN_ATTEMPT_BUDGET_MS) {
                last = Some(LastFailure::OutOfTime);
                break 'candidates;
            }

            match upstream.generate(model, payload, remaining).await {
                Ok(reply) => {
                    let text = extract_text(&reply.parsed);
                    if text.trim().is_empty() {
                        metrics.record_attempt(AttemptResult::Empty);
                        tracing::warn!(
                            request_id = %request_id,
                            model = %model,
                            attempt = attempt,
                            "completion contained no usable text, advancing to next candidate"
                        );
                        last = Some(LastFailure::Empty {
                            model: model.clone(),
                        });
                        continue 'candidates;
                    }

                    metrics.record_attempt(AttemptResult::Success);
                    tracing::info!(
                        request_id = %request_id,
                        model = %model,
                        attempt = attempt,
                        response_chars = text.chars().count(),
                        "upstream call succeeded"
                    );
                    return Ok(EngineOutcome {
                        text,
                        model: model.clone(),
                        usage: reply.parsed.usage_metadata.clone(),
                        raw: Some(reply.raw),
                    });
                }
                Err(error) => {
                    let retryable = error.is_retryable();
                    metrics.record_attempt(if retryable {
                        AttemptResult::Retryable
                    } else {
                        AttemptResult::Fatal
                    });
                    tracing::warn!(
                        request_id = %request_id,
                        model = %model,
                        attempt = attempt,
                        max_attempts = policy.max_attempts(),
                        error = %error,
                        retryable = retryable,
                        "upstream attempt failed"
                    );
                    last = Some(LastFailure::Call { error });

                    if !retryable {
                        continue 'candidates;
                    }
                    if attempt < policy.max_attempts() {
                        let pause = policy.backoff(attempt);
                        if deadline.saturating_duration_since(Instant::now()) <= pause {
                            break 'candidates;
                        }
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }
    }

    tracing::error!(
        request_id = %request_id,
        candidates = candidates.len(),
        "all candidate models exhausted"
    );
    Err(exhaustion_error(last))
}

/// Open a streaming connection, with connection-level retry and fallback
///
/// Once a stream is open it is forwarded as-is; chunk-level failures are not
/// retried. Returns the chosen model alongside the chunk stream.
pub async fn open_stream_with_fallback(
    upstream: &UpstreamClient,
    candidates: &[String],
    payload: &GeneratePayload,
    policy: &RetryPolicy,
    deadline: Instant,
    request_id: RequestId,
    metrics: &Metrics,
) -> Result<(String, BoxStream<'static, Result<String, CallError>>), AppError> {
    let mut last: Option<LastFailure> = None;

    'candidates: for (index, model) in candidates.iter().enumerate() {
        if index > 0 {
            metrics.record_fallback();
        }

        for attempt in 1..=policy.max_attempts() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining < Duration::from_millis(MIN_ATTEMPT_BUDGET_MS) {
                last = Some(LastFailure::OutOfTime);
                break 'candidates;
            }

            match upstream.stream_generate(model, payload, remaining).await {
                Ok(stream) => {
                    metrics.record_attempt(AttemptResult::Success);
                    tracing::info!(
                        request_id = %request_id,
                        model = %model,
                        attempt = attempt,
                        "upstream stream opened"
                    );
                    return Ok((model.clone(), stream));
                }
                Err(error) => {
                    let retryable = error.is_retryable();
                    metrics.record_attempt(if retryable {
                        AttemptResult::Retryable
                    } else {
                        AttemptResult::Fatal
                    });
                    tracing::warn!(
                        request_id = %request_id,
                        model = %model,
                        attempt = attempt,
                        error = %error,
                        retryable = retryable,
                        "failed to open upstream stream"
                    );
                    last = Some(LastFailure::Call { error });

                    if !retryable {
                        continue 'candidates;
                    }
                    if attempt < policy.max_attempts() {
                        let pause = policy.backoff(attempt);
                        if deadline.saturating_duration_since(Instant::now()) <= pause {
                            break 'candidates;
                        }
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }
    }

    Err(exhaustion_error(last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_maps_status_verbatim() {
        let err = exhaustion_error(Some(LastFailure::Call {
            error: CallError::Status {
                status: 429,
                detail: "quota".to_string(),
            },
        }));
        assert!(matches!(
            err,
            AppError::UpstreamStatus { status: 429, .. }
        ));
    }

    #[test]
    fn exhaustion_maps_empty_to_empty_completion() {
        let err = exhaustion_error(Some(LastFailure::Empty {
            model: "gemini-2.5-flash".to_string(),
        }));
        assert!(matches!(err, AppError::EmptyCompletion { .. }));
    }

    #[test]
    fn exhaustion_maps_timeouts_to_deadline() {
        let err = exhaustion_error(Some(LastFailure::Call {
            error: CallError::Timeout { timeout_ms: 1000 },
        }));
        assert!(matches!(err, AppError::DeadlineExhausted));

        let err = exhaustion_error(Some(LastFailure::OutOfTime));
        assert!(matches!(err, AppError::DeadlineExhausted));
    }

    #[test]
    fn exhaustion_maps_network_failure() {
        let err = exhaustion_error(Some(LastFailure::Call {
            error: CallError::Network("connection reset".to_string()),
        }));
        assert!(matches!(err, AppError::UpstreamNetwork(_)));
    }
}
