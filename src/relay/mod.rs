//! Relay HTTP endpoint

mod graphql;
pub mod server;
mod sse;

pub use server::{build_router, run_server, RelayState};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::upstream::UpstreamError;

/// The only upstream-failure text callers ever see; detail stays in the logs
pub const GENERIC_UPSTREAM_ERROR: &str = "Failed to get response from DeepSeek";

/// GraphQL-shaped error body
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "errors": [{ "message": message }] }))).into_response()
}

/// Log the full upstream failure server-side; never echo it to the caller
pub(crate) fn log_upstream_error(error: &UpstreamError) {
    match error {
        UpstreamError::Status { status, body } => {
            tracing::error!(status = *status, body = %body, "DeepSeek API returned error status");
        }
        other => {
            tracing::error!(error = %other, "DeepSeek API call failed");
        }
    }
}
