//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use super::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Whether an upstream API credential was found at startup
    pub upstream_credential: &'static str,
}

/// Health check handler
///
/// Always returns 200 OK. `upstream_credential` is "configured" or
/// "missing"; a missing credential means completion requests will fail with
/// a server configuration error. The key itself is never exposed.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let upstream_credential = if state.has_credential() {
        "configured"
    } else {
        "missing"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            upstream_credential,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::str::FromStr;
    use std::sync::Arc;

    fn test_config() -> Arc<Config> {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 8788

[upstream]
base_url = "https://generativelanguage.googleapis.com/v1beta"

[models]
pool = ["gemini-2.5-flash"]
"#;
        Arc::new(Config::from_str(toml).expect("should parse test config"))
    }

    #[tokio::test]
    async fn health_reports_configured_credential() {
        let state = AppState::with_api_key(test_config(), Some("key".to_string())).unwrap();
        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "OK");
        assert_eq!(body.upstream_credential, "configured");
    }

    #[tokio::test]
    async fn health_reports_missing_credential() {
        let state = AppState::with_api_key(test_config(), None).unwrap();
        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.upstream_credential, "missing");
    }
}
