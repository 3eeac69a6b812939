//! GraphQL endpoint
//!
//! The schema is a fixed two-operation contract, not a general executor:
//!
//! ```graphql
//! type Query    { hello: String }
//! type Mutation { askDeepSeek(prompt: String!): DeepSeekResponse! }
//! type DeepSeekResponse { response: String! }
//! ```
//!
//! Operations are recognized by field name; the prompt argument is read from
//! request variables or from an inline string literal.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Instant;

use super::server::RelayState;
use super::{error_response, log_upstream_error, GENERIC_UPSTREAM_ERROR};

/// GraphQL-over-HTTP request envelope
#[derive(Debug, Deserialize)]
struct GraphqlRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    variables: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, PartialEq)]
enum Operation {
    AskDeepSeek,
    Hello,
    Unsupported,
}

fn classify(query: &str) -> Operation {
    if query.contains("askDeepSeek") {
        Operation::AskDeepSeek
    } else if query.contains("hello") {
        Operation::Hello
    } else {
        Operation::Unsupported
    }
}

pub async fn handle(State(state): State<RelayState>, body: Bytes) -> Response {
    let request: GraphqlRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
            );
        }
    };

    match classify(&request.query) {
        Operation::Hello => {
            (StatusCode::OK, Json(json!({ "data": { "hello": "Hello, World!" } }))).into_response()
        }
        Operation::AskDeepSeek => ask_deepseek(&state, &request).await,
        Operation::Unsupported => {
            error_response(StatusCode::BAD_REQUEST, "unsupported operation")
        }
    }
}

async fn ask_deepseek(state: &RelayState, request: &GraphqlRequest) -> Response {
    let prompt = match extract_prompt(request) {
        Some(prompt) if !prompt.trim().is_empty() => prompt,
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "askDeepSeek requires a non-empty prompt",
            );
        }
    };

    let started = Instant::now();
    match state.upstream.complete(&prompt).await {
        Ok(text) => {
            tracing::info!(
                duration_ms = started.elapsed().as_millis() as u64,
                "Completed askDeepSeek request"
            );
            (
                StatusCode::OK,
                Json(json!({ "data": { "askDeepSeek": { "response": text } } })),
            )
                .into_response()
        }
        Err(e) => {
            log_upstream_error(&e);
            error_response(StatusCode::BAD_GATEWAY, GENERIC_UPSTREAM_ERROR)
        }
    }
}

/// Read the prompt from variables, falling back to an inline string literal
fn extract_prompt(request: &GraphqlRequest) -> Option<String> {
    if let Some(variables) = &request.variables {
        if let Some(prompt) = variables.get("prompt").and_then(|v| v.as_str()) {
            return Some(prompt.to_string());
        }
    }

    inline_prompt_re()
        .captures(&request.query)
        .map(|captures| unescape(&captures[1]))
}

fn inline_prompt_re() -> &'static Regex {
    static INLINE_PROMPT: OnceLock<Regex> = OnceLock::new();
    INLINE_PROMPT.get_or_init(|| {
        Regex::new(r#"askDeepSeek\s*\(\s*prompt\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap()
    })
}

/// Undo GraphQL string-literal escapes
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
