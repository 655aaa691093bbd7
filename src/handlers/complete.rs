//! Completion endpoint (non-streaming path) and boundary adaptation
//!
//! Handles POST /v1/complete. This is where the inbound JSON is shaped into
//! the pipeline's types: lenient numeric parsing with clamping, required
//! field validation, media admission, guardrail assembly, and the outbound
//! success/error envelopes. Streaming requests are dispatched to
//! [`super::stream`] after the same preparation.

use crate::config::{Config, MAX_CONTINUATION_CHUNKS, MAX_OUTPUT_TOKENS_CEILING, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};
use crate::error::{AppError, AppResult, ErrorBody};
use crate::fallback::{AUTO_MODEL, candidate_order, promote};
use crate::media::{MediaKind, MediaNormalizer};
use crate::metrics::Outcome;
use crate::middleware::RequestId;
use crate::postprocess;
use crate::prompt::{
    self, AssembledTurn, GuardrailOptions, LANG_SAMPLE_CHARS, Lang, Role, build_guardrail, detect_lang,
};
use crate::upstream::{
    self,
    client::{Content, GeneratePayload, GenerationOptions, Part},
    retry::RetryPolicy,
};
use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;

use super::AppState;

/// Inbound completion request
///
/// Unknown fields are ignored. Numeric and boolean fields are parsed
/// leniently: a value of the wrong type falls back to the documented default
/// instead of failing the request. Both camelCase and snake_case field names
/// are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompletionRequest {
    pub prompt: Option<String>,
    pub messages: Option<Vec<InboundTurn>>,
    pub images: Option<Vec<Value>>,
    pub audio: Option<Value>,
    #[serde(alias = "modelPreference", alias = "model_preference")]
    pub model: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub temperature: Option<f64>,
    #[serde(alias = "topP", deserialize_with = "lenient_f64")]
    pub top_p: Option<f64>,
    #[serde(
        alias = "maxOutputTokens",
        alias = "maxTokens",
        alias = "max_tokens",
        deserialize_with = "lenient_u64"
    )]
    pub max_output_tokens: Option<u64>,
    #[serde(alias = "systemInstruction", alias = "system")]
    pub system_instruction: Option<String>,
    #[serde(
        alias = "streamRequested",
        alias = "stream_requested",
        deserialize_with = "lenient_bool"
    )]
    pub stream: Option<bool>,
    #[serde(alias = "timeoutMs", deserialize_with = "lenient_u64")]
    pub timeout_ms: Option<u64>,
    #[serde(alias = "includeRaw", deserialize_with = "lenient_bool")]
    pub include_raw: Option<bool>,
    #[serde(deserialize_with = "lenient_mode")]
    pub mode: Mode,
    #[serde(alias = "forceLang")]
    pub force_lang: Option<String>,
    #[serde(
        alias = "conciseImageOverride",
        alias = "concise_image_override",
        deserialize_with = "lenient_bool"
    )]
    pub concise_images: Option<bool>,
    #[serde(alias = "guardLevel", deserialize_with = "lenient_guard_level")]
    pub guard_level: GuardLevel,
    #[serde(alias = "autoContinue", deserialize_with = "lenient_bool")]
    pub auto_continue: Option<bool>,
    #[serde(alias = "maxContinuationChunks", deserialize_with = "lenient_u64")]
    pub max_continuation_chunks: Option<u64>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            prompt: None,
            messages: None,
            images: None,
            audio: None,
            model: None,
            temperature: None,
            top_p: None,
            max_output_tokens: None,
            system_instruction: None,
            stream: None,
            timeout_ms: None,
            include_raw: None,
            mode: Mode::Default,
            force_lang: None,
            concise_images: None,
            guard_level: GuardLevel::Strict,
            auto_continue: None,
            max_continuation_chunks: None,
        }
    }
}

/// One inbound conversation turn
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InboundTurn {
    pub role: Role,
    #[serde(alias = "content")]
    pub text: Option<String>,
    pub images: Option<Vec<Value>>,
    pub audio: Option<Value>,
}

/// Answer-shaping mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Default,
    Qa,
    ImageBrief,
}

/// Guardrail strictness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardLevel {
    Relaxed,
    #[default]
    Strict,
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok())))
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        })
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok())))
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_bool().or_else(|| match value.as_str() {
        Some("true") | Some("1") => Some(true),
        Some("false") | Some("0") => Some(false),
        _ => None,
    }))
}

fn lenient_mode<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Mode, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(
        match value.as_str().map(str::to_ascii_lowercase).as_deref() {
            Some("qa") => Mode::Qa,
            Some("image_brief") | Some("imagebrief") | Some("image-brief") => Mode::ImageBrief,
            _ => Mode::Default,
        },
    )
}

fn lenient_guard_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<GuardLevel, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value.as_str().map(str::to_ascii_lowercase).as_deref() {
        Some("relaxed") => GuardLevel::Relaxed,
        _ => GuardLevel::Strict,
    })
}

/// Generation parameters after clamping and default substitution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: u32,
    pub timeout_ms: u64,
    pub auto_continue: bool,
    pub max_chunks: u32,
}

impl CompletionRequest {
    /// Resolve the effective generation parameters
    ///
    /// Out-of-range numeric values are clamped into range; missing or
    /// non-numeric values fall back to the configured defaults. Nothing here
    /// fails: by the time the upstream payload is built, every parameter is
    /// in its documented range.
    pub fn effective_params(&self, config: &Config) -> EffectiveParams {
        let clamp_unit = |value: Option<f64>, default: f32| -> f32 {
            match value {
                Some(v) if v.is_finite() => (v as f32).clamp(0.0, 1.0),
                _ => default,
            }
        };

        EffectiveParams {
            temperature: clamp_unit(self.temperature, config.generation.temperature),
            top_p: clamp_unit(self.top_p, config.generation.top_p),
            max_output_tokens: self
                .max_output_tokens
                .map(|v| v.clamp(1, MAX_OUTPUT_TOKENS_CEILING) as u32)
                .unwrap_or(config.generation.max_output_tokens),
            timeout_ms: self
                .timeout_ms
                .unwrap_or(config.generation.timeout_ms)
                .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS),
            auto_continue: self.auto_continue.unwrap_or(config.continuation.enabled),
            max_chunks: self
                .max_continuation_chunks
                .map(|v| v.clamp(1, MAX_CONTINUATION_CHUNKS) as u32)
                .unwrap_or(config.continuation.max_chunks),
        }
    }
}

/// Target response language for this request
///
/// An explicit `forceLang` wins; otherwise the combined user-visible text is
/// sampled and classified.
pub(crate) fn request_lang(request: &CompletionRequest) -> Lang {
    if let Some(forced) = request.force_lang.as_deref().and_then(Lang::parse) {
        return forced;
    }

    let mut sample = String::new();
    if let Some(prompt) = &request.prompt {
        sample.push_str(prompt);
    }
    for turn in request.messages.as_deref().unwrap_or(&[]) {
        // Bound the sample by bytes; detection itself re-bounds by chars
        if sample.len() >= LANG_SAMPLE_CHARS * 4 {
            break;
        }
        if turn.role == Role::User {
            if let Some(text) = &turn.text {
                sample.push('\n');
                sample.push_str(text);
            }
        }
    }
    detect_lang(&sample)
}

/// Everything shared by the streaming and non-streaming paths
pub(crate) struct Prepared {
    pub payload: GeneratePayload,
    pub candidates: Vec<String>,
    pub params: EffectiveParams,
}

/// Validate and normalize one request into an upstream payload
pub(crate) fn prepare(
    state: &AppState,
    request: &CompletionRequest,
    lang: Lang,
) -> AppResult<Prepared> {
    let config = state.config();

    let has_prompt = request
        .prompt
        .as_deref()
        .is_some_and(|p| !p.trim().is_empty());
    let messages = request.messages.as_deref().unwrap_or(&[]);
    let has_messages = !messages.is_empty();
    if !has_prompt && !has_messages {
        return Err(AppError::Validation(
            "either `prompt` or a non-empty `messages` array is required".to_string(),
        ));
    }

    let params = request.effective_params(config);

    // Admit media in request order; the normalizer tracks per-item and
    // aggregate ceilings and collects rejection reasons.
    let mut normalizer = MediaNormalizer::new(&config.limits);
    let mut turns: Vec<AssembledTurn> = Vec::new();

    for (i, turn) in messages.iter().enumerate() {
        let mut media = Vec::new();
        for (j, value) in turn.images.as_deref().unwrap_or(&[]).iter().enumerate() {
            if let Some(item) =
                normalizer.admit(MediaKind::Image, format!("messages[{i}].images[{j}]"), value)
            {
                media.push(item);
            }
        }
        if let Some(value) = &turn.audio {
            if let Some(item) =
                normalizer.admit(MediaKind::Audio, format!("messages[{i}].audio"), value)
            {
                media.push(item);
            }
        }
        turns.push(AssembledTurn {
            role: turn.role,
            text: turn.text.clone(),
            media,
        });
    }

    let mut top_media = Vec::new();
    for (j, value) in request.images.as_deref().unwrap_or(&[]).iter().enumerate() {
        if let Some(item) = normalizer.admit(MediaKind::Image, format!("images[{j}]"), value) {
            top_media.push(item);
        }
    }
    if let Some(value) = &request.audio {
        if let Some(item) = normalizer.admit(MediaKind::Audio, "audio".to_string(), value) {
            top_media.push(item);
        }
    }

    for rejection in normalizer.rejections() {
        state.metrics().record_media_rejection(rejection.reason);
    }

    // Media was supplied and none of it survived: fail loudly instead of
    // letting the model "analyze" attachments it never received.
    if normalizer.all_rejected() {
        return Err(AppError::MediaRejected(normalizer.into_rejections()));
    }
    let media_present = normalizer.accepted() > 0;

    if has_messages {
        if has_prompt || !top_media.is_empty() {
            turns.push(AssembledTurn {
                role: Role::User,
                text: request.prompt.clone(),
                media: top_media,
            });
        }
    } else {
        turns.push(AssembledTurn {
            role: Role::User,
            text: request.prompt.clone(),
            media: top_media,
        });
    }

    let image_brief = request
        .concise_images
        .unwrap_or(media_present || request.mode == Mode::ImageBrief);
    let guardrail = build_guardrail(&GuardrailOptions {
        lang,
        brief: request.mode == Mode::Qa,
        image_brief,
        strict: request.guard_level != GuardLevel::Relaxed,
    });

    let conversation = prompt::assemble(&guardrail, turns, request.system_instruction.clone());
    if conversation.contents.is_empty() {
        return Err(AppError::Validation(
            "request contains no usable content".to_string(),
        ));
    }

    let payload = GeneratePayload::new(
        conversation.system,
        conversation.contents,
        GenerationOptions {
            temperature: params.temperature,
            top_p: params.top_p,
            max_output_tokens: params.max_output_tokens,
        },
    );

    let preference = request.model.as_deref().unwrap_or(AUTO_MODEL);
    let candidates = candidate_order(&config.models.pool, preference);

    Ok(Prepared {
        payload,
        candidates,
        params,
    })
}

/// Outbound success envelope
#[derive(Debug, serde::Serialize)]
pub struct SuccessBody {
    pub text: String,
    pub model: String,
    pub lang: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub took_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// POST /v1/complete handler
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<CompletionRequest>,
) -> Response {
    let started = std::time::Instant::now();
    let lang = request_lang(&request);

    tracing::debug!(
        request_id = %request_id,
        lang = lang.as_tag(),
        stream = request.stream.unwrap_or(false),
        model = request.model.as_deref().unwrap_or(AUTO_MODEL),
        "received completion request"
    );

    if request.stream == Some(true) {
        return super::stream::respond(state, request_id, request, lang, started).await;
    }

    match run(&state, request_id, &request, lang, started).await {
        Ok(body) => {
            state.metrics().record_request(Outcome::Success);
            state
                .metrics()
                .record_completion_seconds("json", started.elapsed().as_secs_f64());
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => error_response(&state, err, request_id, Some(lang)),
    }
}

/// Map a pipeline failure to the outbound error envelope
pub(crate) fn error_response(
    state: &AppState,
    err: AppError,
    request_id: RequestId,
    lang: Option<Lang>,
) -> Response {
    let status = err.status();
    state.metrics().record_request(Outcome::from_status(status));
    tracing::warn!(
        request_id = %request_id,
        status = %status,
        error = %err,
        "completion request failed"
    );
    let body = ErrorBody::from_error(&err, Some(request_id.to_string()), lang.map(|l| l.as_tag()));
    (status, Json(body)).into_response()
}

async fn run(
    state: &AppState,
    request_id: RequestId,
    request: &CompletionRequest,
    lang: Lang,
    started: std::time::Instant,
) -> AppResult<SuccessBody> {
    let prepared = prepare(state, request, lang)?;
    let upstream_client = state.upstream()?;
    let policy = RetryPolicy::from_config(&state.config().retry);
    let deadline = tokio::time::Instant::now() + Duration::from_millis(prepared.params.timeout_ms);

    let outcome = upstream::generate_with_fallback(
        upstream_client,
        &prepared.candidates,
        &prepared.payload,
        &policy,
        deadline,
        request_id,
        state.metrics(),
    )
    .await?;

    let mut text = outcome.text;
    let model = outcome.model;
    let mut usage = outcome.usage;
    let mut raw = outcome.raw;

    if prepared.params.auto_continue {
        let min_remaining = Duration::from_millis(state.config().continuation.min_remaining_ms);
        let mut chunks = 1u32;

        while chunks < prepared.params.max_chunks
            && postprocess::looks_truncated(&text)
            && deadline.saturating_duration_since(tokio::time::Instant::now()) > min_remaining
        {
            // The accumulated answer becomes a model turn; the guardrail was
            // injected on the original first user turn and is not repeated.
            let mut contents = prepared.payload.contents.clone();
            contents.push(Content::model(vec![Part::text(text.clone())]));
            contents.push(Content::user(vec![Part::text(
                postprocess::continuation_instruction(lang),
            )]));
            let continuation = prepared.payload.with_contents(contents);

            let order = promote(&prepared.candidates, &model);
            match upstream::generate_with_fallback(
                upstream_client,
                &order,
                &continuation,
                &policy,
                deadline,
                request_id,
                state.metrics(),
            )
            .await
            {
                Ok(next) => {
                    tracing::debug!(
                        request_id = %request_id,
                        chunk = chunks + 1,
                        added_chars = next.text.chars().count(),
                        "auto-continuation chunk appended"
                    );
                    text = postprocess::merge_continuation(&text, &next.text);
                    usage = next.usage.or(usage);
                    raw = next.raw.or(raw);
                    chunks += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        request_id = %request_id,
                        error = %err,
                        "auto-continuation failed, returning accumulated answer"
                    );
                    break;
                }
            }
        }
    }

    let text = postprocess::mirror_language(lang, text);

    Ok(SuccessBody {
        text,
        model,
        lang: lang.as_tag(),
        usage,
        request_id: request_id.to_string(),
        took_ms: started.elapsed().as_millis() as u64,
        raw: if request.include_raw == Some(true) {
            raw
        } else {
            None
        },
    })
}
