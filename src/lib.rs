//! Wasit - bilingual completion proxy for Google generative AI models
//!
//! This library sits between client applications and the Generative Language
//! REST API. It normalizes inbound requests (media payloads, conversation
//! turns, generation parameters), synthesizes an Arabic/English guardrail
//! preamble, walks an ordered pool of candidate models with per-model retry
//! and backoff, and post-processes the final text (language mirroring,
//! auto-continuation of truncated answers).

pub mod cli;
pub mod config;
pub mod error;
pub mod fallback;
pub mod handlers;
pub mod media;
pub mod metrics;
pub mod middleware;
pub mod postprocess;
pub mod prompt;
pub mod telemetry;
pub mod upstream;
