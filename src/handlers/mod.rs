//! HTTP request handlers for the Wasit API

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::upstream::client::UpstreamClient;
use std::sync::Arc;

pub mod complete;
pub mod health;
pub mod metrics;
pub mod stream;

/// Application state shared across all handlers
///
/// Contains configuration, the upstream client, and the metrics registry.
/// All fields are Arc'd for cheap cloning across Axum handlers; nothing in
/// here is mutated after startup.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    upstream: Option<Arc<UpstreamClient>>,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Create a new AppState, resolving the API key from the environment
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let api_key = config.upstream.api_key();
        Self::with_api_key(config, api_key)
    }

    /// Create an AppState with an explicit API key (or none)
    ///
    /// Used by `new()` and by tests that must not read process environment.
    pub fn with_api_key(config: Arc<Config>, api_key: Option<String>) -> AppResult<Self> {
        let metrics = Metrics::new()
            .map_err(|e| AppError::Internal(format!("failed to build metrics registry: {e}")))?;

        let upstream = api_key
            .map(|key| Arc::new(UpstreamClient::new(&config.upstream.base_url, key)));
        if upstream.is_none() {
            tracing::warn!(
                api_key_env = %config.upstream.api_key_env,
                "upstream API key not set; completion requests will fail with server_config"
            );
        }

        Ok(Self {
            config,
            upstream,
            metrics: Arc::new(metrics),
        })
    }

    /// Get reference to the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the upstream client, or the server-configuration error
    pub fn upstream(&self) -> AppResult<&UpstreamClient> {
        self.upstream
            .as_deref()
            .ok_or(AppError::MissingCredential)
    }

    /// Whether an upstream credential was configured at startup
    pub fn has_credential(&self) -> bool {
        self.upstream.is_some()
    }

    /// Get reference to the metrics registry
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
