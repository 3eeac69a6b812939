//! Streaming relay route
//!
//! Forwards one prompt to the upstream streaming API and re-emits the answer
//! as named SSE events: `text` per delta, `data` for the provider's usage
//! report, `error` (generic message only) if the upstream fails mid-stream.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;

use super::server::RelayState;
use super::{error_response, log_upstream_error, GENERIC_UPSTREAM_ERROR};
use crate::stream::kind;
use crate::upstream::UpstreamDelta;

#[derive(Debug, Deserialize)]
struct StreamRequest {
    #[serde(default)]
    prompt: String,
}

pub async fn handle(State(state): State<RelayState>, body: Bytes) -> Response {
    let request: StreamRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
            );
        }
    };

    if request.prompt.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "prompt must not be empty");
    }

    match state.upstream.complete_stream(&request.prompt).await {
        Ok(deltas) => {
            let events = deltas.map(|item| -> Result<Event, Infallible> {
                Ok(match item {
                    Ok(UpstreamDelta::Content(text)) => sse_event(kind::TEXT, &text),
                    Ok(UpstreamDelta::Usage(usage)) => {
                        sse_event(kind::DATA, &json!({ "usage": usage }))
                    }
                    Err(e) => {
                        log_upstream_error(&e);
                        sse_event(kind::ERROR, &GENERIC_UPSTREAM_ERROR)
                    }
                })
            });
            Sse::new(events).into_response()
        }
        Err(e) => {
            log_upstream_error(&e);
            error_response(StatusCode::BAD_GATEWAY, GENERIC_UPSTREAM_ERROR)
        }
    }
}

/// Create a named SSE event with a JSON payload
fn sse_event(kind: &str, payload: &impl Serialize) -> Event {
    Event::default().event(kind).json_data(payload).unwrap()
}
