//! Streaming completion path
//!
//! When a request asks for streaming, the same preparation as the JSON path
//! runs first; the engine then opens one upstream SSE connection (with
//! connection-level retry and model fallback) and forwards its chunks. The
//! outbound stream has three event kinds:
//!
//! - `meta`: request id, chosen model, target language (sent first)
//! - `chunk`: one raw upstream fragment, forwarded as-is
//! - `end`: chosen model and elapsed time (sent last)

use crate::metrics::Outcome;
use crate::middleware::RequestId;
use crate::prompt::Lang;
use crate::upstream::{self, retry::RetryPolicy};
use axum::response::{
    IntoResponse, Response,
    sse::{Event, KeepAlive, Sse},
};
use futures::{StreamExt, stream};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;

use super::AppState;
use super::complete::{CompletionRequest, error_response, prepare};

/// Handle a completion request with `stream: true`
pub(crate) async fn respond(
    state: AppState,
    request_id: RequestId,
    request: CompletionRequest,
    lang: Lang,
    started: std::time::Instant,
) -> Response {
    let prepared = match prepare(&state, &request, lang) {
        Ok(prepared) => prepared,
        Err(err) => return error_response(&state, err, request_id, Some(lang)),
    };
    let upstream_client = match state.upstream() {
        Ok(client) => client,
        Err(err) => return error_response(&state, err, request_id, Some(lang)),
    };

    let policy = RetryPolicy::from_config(&state.config().retry);
    let deadline = tokio::time::Instant::now() + Duration::from_millis(prepared.params.timeout_ms);

    let (model, upstream_stream) = match upstream::open_stream_with_fallback(
        upstream_client,
        &prepared.candidates,
        &prepared.payload,
        &policy,
        deadline,
        request_id,
        state.metrics(),
    )
    .await
    {
        Ok(opened) => opened,
        Err(err) => return error_response(&state, err, request_id, Some(lang)),
    };

    state.metrics().record_request(Outcome::Success);
    state
        .metrics()
        .record_completion_seconds("stream", started.elapsed().as_secs_f64());

    tracing::info!(
        request_id = %request_id,
        model = %model,
        lang = lang.as_tag(),
        "forwarding upstream stream"
    );

    let meta = Event::default().event("meta").data(
        json!({
            "requestId": request_id.to_string(),
            "model": model.as_str(),
            "lang": lang.as_tag(),
        })
        .to_string(),
    );

    // Once the stream is open, chunk-level failures end the stream but are
    // not retried; whatever arrived has already been forwarded.
    let chunks = upstream_stream.filter_map(move |item| async move {
        match item {
            Ok(data) => Some(Ok::<Event, Infallible>(
                Event::default().event("chunk").data(data),
            )),
            Err(error) => {
                tracing::warn!(error = %error, "upstream stream interrupted");
                None
            }
        }
    });

    let end_model = model.clone();
    let end = stream::once(async move {
        Ok::<Event, Infallible>(
            Event::default().event("end").data(
                json!({
                    "model": end_model,
                    "took_ms": started.elapsed().as_millis() as u64,
                })
                .to_string(),
            ),
        )
    });

    let events = stream::iter([Ok::<Event, Infallible>(meta)])
        .chain(chunks)
        .chain(end);

    Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text(""),
        )
        .into_response()
}
