//! Configuration management for Wasit
//!
//! Parses TOML configuration files and provides typed access to settings.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Hard ceiling on requested output tokens
pub const MAX_OUTPUT_TOKENS_CEILING: u64 = 8192;
/// Lower bound for the per-request deadline in milliseconds
pub const MIN_TIMEOUT_MS: u64 = 1_000;
/// Upper bound for the per-request deadline in milliseconds
///
/// The hosting platform enforces its own hard execution ceiling just above
/// this; requests must finish (or fail) before it fires.
pub const MAX_TIMEOUT_MS: u64 = 29_000;
/// Hard ceiling on auto-continuation chunks per request
pub const MAX_CONTINUATION_CHUNKS: u64 = 12;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub models: ModelsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub continuation: ContinuationConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream generative API configuration
///
/// The API key itself is never stored in the config file; only the name of
/// the environment variable that holds it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl UpstreamConfig {
    /// Resolve the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

fn default_api_key_env() -> String {
    "WASIT_API_KEY".to_string()
}

/// Candidate model pool, in fallback order
///
/// The ordering is a deployment policy choice: accuracy-tuned deployments
/// list higher-capability models first, latency-tuned deployments list
/// faster models first.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelsConfig {
    pub pool: Vec<String>,
}

/// Inbound media size ceilings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Per-item ceiling on the approximate decoded media size, in bytes
    #[serde(default = "default_media_item_bytes")]
    pub media_item_bytes: u64,
    /// Aggregate ceiling across all media in one request, in bytes
    #[serde(default = "default_media_total_bytes")]
    pub media_total_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            media_item_bytes: default_media_item_bytes(),
            media_total_bytes: default_media_total_bytes(),
        }
    }
}

fn default_media_item_bytes() -> u64 {
    15 * 1024 * 1024
}

fn default_media_total_bytes() -> u64 {
    60 * 1024 * 1024
}

/// Per-model retry tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff in milliseconds (doubles each retry)
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Upper bound on the random jitter added to each backoff, in milliseconds
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_backoff_ms() -> u64 {
    600
}

fn default_max_jitter_ms() -> u64 {
    400
}

/// Generation parameter defaults
///
/// These are the documented fallbacks used when the caller omits a value or
/// supplies one that is out of range or non-numeric.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Default per-request deadline in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.95
}

fn default_max_output_tokens() -> u32 {
    2048
}

fn default_timeout_ms() -> u64 {
    20_000
}

/// Auto-continuation tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContinuationConfig {
    #[serde(default = "default_continuation_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: u32,
    /// Continuation calls are skipped once less than this remains of the
    /// request deadline, in milliseconds
    #[serde(default = "default_min_remaining_ms")]
    pub min_remaining_ms: u64,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            enabled: default_continuation_enabled(),
            max_chunks: default_max_chunks(),
            min_remaining_ms: default_min_remaining_ms(),
        }
    }
}

fn default_continuation_enabled() -> bool {
    true
}

fn default_max_chunks() -> u32 {
    4
}

fn default_min_remaining_ms() -> u64 {
    2_500
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            crate::error::AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self = toml::from_str(&content).map_err(|source| {
            crate::error::AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 3: Validate parsed config (provides contextual reason)
        config
            .validate()
            .map_err(|e| crate::error::AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()`, but can also be called
    /// explicitly when constructing Config via other means (e.g., in tests).
    pub fn validate(&self) -> crate::error::AppResult<()> {
        // Upstream endpoint
        if !self.upstream.base_url.starts_with("http://")
            && !self.upstream.base_url.starts_with("https://")
        {
            return Err(crate::error::AppError::Config(format!(
                "upstream.base_url '{}' must start with 'http://' or 'https://'",
                self.upstream.base_url
            )));
        }
        if self.upstream.api_key_env.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "upstream.api_key_env must name an environment variable".to_string(),
            ));
        }

        // Model pool: at least one candidate, no blank names
        if self.models.pool.is_empty() {
            return Err(crate::error::AppError::Config(
                "models.pool must list at least one candidate model.\n\n\
                Example fix - add to config.toml:\n\
                [models]\n\
                pool = [\"gemini-2.5-flash\", \"gemini-2.5-pro\"]"
                    .to_string(),
            ));
        }
        for name in &self.models.pool {
            if name.trim().is_empty() {
                return Err(crate::error::AppError::Config(
                    "models.pool contains a blank model name".to_string(),
                ));
            }
        }

        // Media ceilings
        if self.limits.media_item_bytes == 0 {
            return Err(crate::error::AppError::Config(
                "limits.media_item_bytes must be greater than 0".to_string(),
            ));
        }
        if self.limits.media_total_bytes < self.limits.media_item_bytes {
            return Err(crate::error::AppError::Config(format!(
                "limits.media_total_bytes ({}) cannot be smaller than limits.media_item_bytes ({})",
                self.limits.media_total_bytes, self.limits.media_item_bytes
            )));
        }

        // Retry bounds
        if self.retry.max_attempts == 0 || self.retry.max_attempts > 10 {
            return Err(crate::error::AppError::Config(format!(
                "retry.max_attempts must be between 1 and 10, got {}",
                self.retry.max_attempts
            )));
        }
        if self.retry.base_backoff_ms == 0 {
            return Err(crate::error::AppError::Config(
                "retry.base_backoff_ms must be greater than 0".to_string(),
            ));
        }

        // Generation defaults: these are the values clamping falls back to,
        // so they must themselves be in range
        for (name, value) in [
            ("generation.temperature", self.generation.temperature),
            ("generation.top_p", self.generation.top_p),
        ] {
            if value.is_nan() || value.is_infinite() || !(0.0..=1.0).contains(&value) {
                return Err(crate::error::AppError::Config(format!(
                    "{} must be a finite number between 0.0 and 1.0, got {}",
                    name, value
                )));
            }
        }
        if self.generation.max_output_tokens == 0
            || self.generation.max_output_tokens as u64 > MAX_OUTPUT_TOKENS_CEILING
        {
            return Err(crate::error::AppError::Config(format!(
                "generation.max_output_tokens must be between 1 and {}, got {}",
                MAX_OUTPUT_TOKENS_CEILING, self.generation.max_output_tokens
            )));
        }
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&self.generation.timeout_ms) {
            return Err(crate::error::AppError::Config(format!(
                "generation.timeout_ms must be between {} and {}, got {}",
                MIN_TIMEOUT_MS, MAX_TIMEOUT_MS, self.generation.timeout_ms
            )));
        }

        // Continuation budget
        if self.continuation.max_chunks == 0
            || self.continuation.max_chunks as u64 > MAX_CONTINUATION_CHUNKS
        {
            return Err(crate::error::AppError::Config(format!(
                "continuation.max_chunks must be between 1 and {}, got {}",
                MAX_CONTINUATION_CHUNKS, self.continuation.max_chunks
            )));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = crate::error::AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(toml_str).map_err(|source| {
            crate::error::AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            }
        })?;

        config.validate()?;
        Ok(config)
    }
}
