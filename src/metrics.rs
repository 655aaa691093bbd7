//! Prometheus metrics collection
//!
//! Tracks request outcomes, upstream attempt results, model fallbacks, and
//! media rejections. Label values come from closed enums so cardinality is
//! bounded at compile time. Metrics are exposed via the `/metrics` endpoint
//! in Prometheus text format.

use crate::media::RejectReason;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Final request outcome, as seen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ClientError,
    UpstreamError,
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::ClientError => "client_error",
            Outcome::UpstreamError => "upstream_error",
            Outcome::Timeout => "timeout",
        }
    }

    /// Classify from the HTTP status of the outbound response
    pub fn from_status(status: axum::http::StatusCode) -> Self {
        if status.is_success() {
            Outcome::Success
        } else if status == axum::http::StatusCode::GATEWAY_TIMEOUT {
            Outcome::Timeout
        } else if status.is_client_error() {
            Outcome::ClientError
        } else {
            Outcome::UpstreamError
        }
    }
}

/// Result of one upstream attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Success,
    /// Transient failure, eligible for another attempt on the same model
    Retryable,
    /// Permanent failure, advances to the next candidate immediately
    Fatal,
    /// HTTP success that yielded no usable text
    Empty,
}

impl AttemptResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptResult::Success => "success",
            AttemptResult::Retryable => "retryable",
            AttemptResult::Fatal => "fatal",
            AttemptResult::Empty => "empty",
        }
    }
}

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    requests_total: IntCounterVec,
    upstream_attempts_total: IntCounterVec,
    model_fallbacks_total: IntCounter,
    media_rejected_total: IntCounterVec,
    completion_seconds: HistogramVec,
}

impl Metrics {
    /// Create a new Metrics instance with its own registry
    ///
    /// # Errors
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("wasit_requests_total", "Completion requests by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let upstream_attempts_total = IntCounterVec::new(
            Opts::new(
                "wasit_upstream_attempts_total",
                "Individual upstream calls by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(upstream_attempts_total.clone()))?;

        let model_fallbacks_total = IntCounter::new(
            "wasit_model_fallbacks_total",
            "Times the engine advanced to the next candidate model",
        )?;
        registry.register(Box::new(model_fallbacks_total.clone()))?;

        let media_rejected_total = IntCounterVec::new(
            Opts::new("wasit_media_rejected_total", "Rejected media items by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(media_rejected_total.clone()))?;

        let completion_seconds = HistogramVec::new(
            HistogramOpts::new(
                "wasit_completion_seconds",
                "End-to-end completion latency by mode",
            )
            .buckets(vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]),
            &["mode"],
        )?;
        registry.register(Box::new(completion_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            upstream_attempts_total,
            model_fallbacks_total,
            media_rejected_total,
            completion_seconds,
        })
    }

    pub fn record_request(&self, outcome: Outcome) {
        self.requests_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn record_attempt(&self, result: AttemptResult) {
        self.upstream_attempts_total
            .with_label_values(&[result.as_str()])
            .inc();
    }

    pub fn record_fallback(&self) {
        self.model_fallbacks_total.inc();
    }

    pub fn record_media_rejection(&self, reason: RejectReason) {
        self.media_rejected_total
            .with_label_values(&[reason.label()])
            .inc();
    }

    pub fn record_completion_seconds(&self, mode: &'static str, seconds: f64) {
        self.completion_seconds
            .with_label_values(&[mode])
            .observe(seconds);
    }

    /// Encode all registered metrics in Prometheus text format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_export() {
        let metrics = Metrics::new().expect("registry should build");

        metrics.record_request(Outcome::Success);
        metrics.record_attempt(AttemptResult::Retryable);
        metrics.record_fallback();
        metrics.record_media_rejection(RejectReason::PerPart);
        metrics.record_completion_seconds("json", 1.2);

        let exported = metrics.export().expect("export should succeed");
        assert!(exported.contains("wasit_requests_total"));
        assert!(exported.contains("outcome=\"success\""));
        assert!(exported.contains("result=\"retryable\""));
        assert!(exported.contains("wasit_model_fallbacks_total 1"));
        assert!(exported.contains("reason=\"per-part\""));
        assert!(exported.contains("wasit_completion_seconds"));
    }

    #[test]
    fn outcome_from_status_classification() {
        use axum::http::StatusCode;
        assert_eq!(Outcome::from_status(StatusCode::OK), Outcome::Success);
        assert_eq!(
            Outcome::from_status(StatusCode::BAD_REQUEST),
            Outcome::ClientError
        );
        assert_eq!(
            Outcome::from_status(StatusCode::PAYLOAD_TOO_LARGE),
            Outcome::ClientError
        );
        assert_eq!(
            Outcome::from_status(StatusCode::BAD_GATEWAY),
            Outcome::UpstreamError
        );
        assert_eq!(
            Outcome::from_status(StatusCode::GATEWAY_TIMEOUT),
            Outcome::Timeout
        );
    }

    #[test]
    fn separate_instances_have_separate_registries() {
        let a = Metrics::new().expect("first registry");
        let b = Metrics::new().expect("second registry");
        a.record_request(Outcome::Success);

        assert!(a.export().unwrap().contains("outcome=\"success\""));
        assert!(!b.export().unwrap().contains("outcome=\"success\""));
    }
}
