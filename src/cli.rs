//! Command-line interface for Wasit
//!
//! Provides argument parsing and subcommand handling for the Wasit binary.

use clap::{Parser, Subcommand};

/// Bilingual completion proxy for Google generative AI models
#[derive(Parser)]
#[command(name = "wasit")]
#[command(version)]
#[command(about = "Bilingual completion proxy for Google generative AI models")]
#[command(
    long_about = "Wasit proxies normalized completion requests to the Generative Language API, \
    with media size policing, Arabic/English guardrails, multi-model fallback with retry, \
    streaming, and auto-continuation of truncated answers."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# Wasit Configuration
# ===================
#
# This file configures the HTTP server, the upstream generative API, the
# candidate model pool, media limits, retry tuning, and observability.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on
port = 8788

# ─────────────────────────────────────────────────────────────────────────────
# UPSTREAM API
# ─────────────────────────────────────────────────────────────────────────────

[upstream]
# Base URL of the Generative Language REST API
base_url = "https://generativelanguage.googleapis.com/v1beta"

# Name of the environment variable holding the API key.
# The key itself never appears in this file.
api_key_env = "WASIT_API_KEY"

# ─────────────────────────────────────────────────────────────────────────────
# MODEL POOL
# ─────────────────────────────────────────────────────────────────────────────
#
# Candidate models in fallback order. The first entry is tried first when the
# caller asks for "auto"; a caller-named model is tried before the pool.
# Ordering is a deployment choice: put higher-capability models first for
# accuracy-tuned deployments, faster models first for latency-tuned ones.

[models]
pool = ["gemini-2.5-flash", "gemini-2.5-pro", "gemini-2.0-flash"]

# ─────────────────────────────────────────────────────────────────────────────
# MEDIA LIMITS
# ─────────────────────────────────────────────────────────────────────────────

[limits]
# Per-item ceiling on approximate decoded media size (bytes). Default 15 MiB.
media_item_bytes = 15728640

# Aggregate ceiling across all media in one request (bytes). Default 60 MiB.
media_total_bytes = 62914560

# ─────────────────────────────────────────────────────────────────────────────
# RETRY
# ─────────────────────────────────────────────────────────────────────────────

[retry]
# Attempts per candidate model (1-10)
max_attempts = 4

# Base backoff in milliseconds; doubles each retry
base_backoff_ms = 600

# Upper bound on random jitter added to each backoff, in milliseconds
max_jitter_ms = 400

# ─────────────────────────────────────────────────────────────────────────────
# GENERATION DEFAULTS
# ─────────────────────────────────────────────────────────────────────────────
#
# Used when the caller omits a parameter or supplies one that is out of range
# or non-numeric.

[generation]
temperature = 0.7
top_p = 0.95
max_output_tokens = 2048

# Default per-request deadline in milliseconds (clamped to 1000-29000)
timeout_ms = 20000

# ─────────────────────────────────────────────────────────────────────────────
# AUTO-CONTINUATION
# ─────────────────────────────────────────────────────────────────────────────

[continuation]
# Re-invoke the model when an answer looks truncated
enabled = true

# Maximum chunks per request (1-12)
max_chunks = 4

# Skip continuation once less than this remains of the deadline (ms)
min_remaining_ms = 2500

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::str::FromStr;

    #[test]
    fn verify_cli() {
        // Clap's built-in verification for the CLI structure
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_path() {
        let cli = Cli::parse_from(["wasit"]);
        assert_eq!(cli.config, "config.toml");
        assert!(cli.command.is_none());
    }

    #[test]
    fn custom_config_path() {
        let cli = Cli::parse_from(["wasit", "--config", "custom.toml"]);
        assert_eq!(cli.config, "custom.toml");
    }

    #[test]
    fn config_subcommand() {
        let cli = Cli::parse_from(["wasit", "config"]);
        assert!(matches!(cli.command, Some(Command::Config { output: None })));
    }

    #[test]
    fn config_subcommand_with_output() {
        let cli = Cli::parse_from(["wasit", "config", "-o", "my-config.toml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: Some(ref path) }) if path == "my-config.toml"
        ));
    }

    #[test]
    fn template_parses_and_validates() {
        let template = generate_config_template();
        let config = crate::config::Config::from_str(template)
            .expect("template should be a valid, validating config");
        assert_eq!(config.models.pool.len(), 3);
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn template_has_all_sections() {
        let template = generate_config_template();
        assert!(template.contains("[server]"));
        assert!(template.contains("[upstream]"));
        assert!(template.contains("[models]"));
        assert!(template.contains("[limits]"));
        assert!(template.contains("[retry]"));
        assert!(template.contains("[generation]"));
        assert!(template.contains("[continuation]"));
        assert!(template.contains("[observability]"));
    }
}
