use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Json, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{Stream, StreamExt as _, stream};
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use veracity_ai_harness::vendors::anthropic::{AnthropicRequestOptions, AnthropicRunBuilderExt};
use veracity_ai_harness::{RunStream, StreamEvent as RunEvent};
use veracity_stream::{
    AssessRequest, SessionOutcome, SourceError, SourceEvent, SourceUsage, SseEmitter,
    StreamOrchestrator,
};

use super::state::AppState;
use crate::prompt::{Mode, route_intent};

const FRAME_BUFFER: usize = 256;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

fn error_response(status: StatusCode, code: &str, message: &str, retry_after: Option<u64>) -> Response {
    (
        status,
        Json(ErrorBody {
            code: code.into(),
            message: message.into(),
            retry_after,
        }),
    )
        .into_response()
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /api/assess
///
/// Starts a model run for the claim and returns the live event stream as a
/// Server-Sent-Events response. The response body is the emitter's frame
/// channel; when the client disconnects the channel closes, the orchestrator
/// stops, and the upstream run is aborted.
pub async fn assess(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AssessRequest>,
) -> Response {
    let client = client_key(&headers);
    if let Err(limited) = state.limiter.check(&client) {
        warn!(client = %client, "rate limited");
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "too many requests",
            Some(limited.retry_after),
        );
    }

    if request.claim.trim().is_empty() {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_request",
            "claim must not be empty",
            None,
        );
    }
    let mode = match request.mode.as_deref() {
        Some(raw) => match Mode::parse(raw) {
            Some(mode) => mode,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "mode must be one of assess, dialogue, guidance",
                    None,
                );
            }
        },
        None => route_intent(&request.claim),
    };

    let run = state
        .harness
        .session("assess")
        .run(state.model.clone())
        .system_prompt(state.prompts.system_prompt(mode))
        .user_text(state.prompts.build_prompt(&request, mode))
        .anthropic_options(AnthropicRequestOptions::default().max_tokens(state.max_tokens))
        .start_stream()
        .await;
    let run = match run {
        Ok(run) => run,
        Err(e) => {
            error!(error = %e, "failed to start model run");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "upstream_failure",
                "failed to start model run",
                None,
            );
        }
    };

    let run_id = run.run_id();
    let abort = run.abort_handle();
    let (emitter, rx) = SseEmitter::channel(FRAME_BUFFER);
    tokio::spawn(async move {
        let outcome = StreamOrchestrator::new(emitter).run(run_source(run)).await;
        match outcome {
            SessionOutcome::Completed(report) => {
                info!(run_id = %run_id, success = report.success, duration = report.duration_seconds, "assessment session completed");
            }
            SessionOutcome::Failed { code, message } => {
                warn!(run_id = %run_id, code = %code, message = %message, "assessment session failed");
                abort.abort();
            }
        }
    });

    let body = Body::from_stream(
        ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(Bytes::from(frame))),
    );
    let mut response = Response::new(body);
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response_headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response_headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    response
}

fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

/// Adapts a harness `RunStream` into the orchestrator's source stream.
fn run_source(run: RunStream) -> impl Stream<Item = Result<SourceEvent, SourceError>> + Send {
    stream::unfold(run, |mut run| async move {
        run.next_event().await.map(|event| (event, run))
    })
    .filter_map(|event| async move {
        match event {
            RunEvent::RunStarted { .. } => None,
            RunEvent::OutputDelta { text, .. } => Some(Ok(SourceEvent::Delta(text))),
            RunEvent::Completed { output, .. } => Some(Ok(SourceEvent::Done(SourceUsage {
                total_tokens: output.usage.map(|u| u.total()),
                model: None,
            }))),
            RunEvent::Error { error, .. } => Some(Err(SourceError {
                code: error.code().into(),
                message: error.to_string(),
                retry_after: None,
            })),
        }
    })
}
