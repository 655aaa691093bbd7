//! Retry policy shared by both execution modes
//!
//! One policy value parameterizes every retry loop in the engine: maximum
//! attempts per model, exponential backoff with bounded random jitter, and
//! the retryable-status predicate. The streaming and non-streaming paths
//! consult it identically.

use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Maximum backoff duration in milliseconds (30 seconds)
///
/// Prevents infinite sleep from exponential overflow.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Retry tuning for upstream attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff_ms: u64,
    max_jitter_ms: u64,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Errors
    /// Returns an error if `max_attempts` is 0 (at least 1 attempt is required)
    pub fn new(
        max_attempts: u32,
        base_backoff_ms: u64,
        max_jitter_ms: u64,
    ) -> Result<Self, &'static str> {
        if max_attempts == 0 {
            return Err("max_attempts must be at least 1");
        }
        Ok(Self {
            max_attempts,
            base_backoff_ms,
            max_jitter_ms,
        })
    }

    /// Build from validated configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff_ms: config.base_backoff_ms,
            max_jitter_ms: config.max_jitter_ms,
        }
    }

    /// Maximum number of attempts per candidate model
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before the retry following `attempt` (1-indexed)
    ///
    /// The deterministic part is `base * 2^(attempt-1)`, capped at
    /// [`MAX_BACKOFF_MS`]; a random jitter in `[0, max_jitter_ms]` is added
    /// on top.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let base = self
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(exponent))
            .min(MAX_BACKOFF_MS);
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.max_jitter_ms)
        };
        Duration::from_millis(base.saturating_add(jitter))
    }
}

/// Whether an upstream HTTP status justifies another attempt
///
/// Rate limiting and server errors are transient; everything else (client
/// errors, malformed requests) terminates the retry loop for that model.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}
