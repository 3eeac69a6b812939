//! Relay server: router, shared state, middleware stack

use axum::{
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{graphql, sse};
use crate::config::AppConfig;
use crate::upstream::UpstreamClient;

/// Shared state for the relay
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<AppConfig>,
    pub upstream: UpstreamClient,
}

impl RelayState {
    pub fn new(config: AppConfig) -> Result<Self, reqwest::Error> {
        let http_client = build_http_client(&config)?;
        let config = Arc::new(config);
        Ok(Self {
            upstream: UpstreamClient::new(http_client, config.clone()),
            config,
        })
    }
}

/// Build the HTTP client used for upstream connections
fn build_http_client(config: &AppConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upstream.timeout_seconds))
        .pool_max_idle_per_host(10)
        .build()
}

/// Build the relay router
///
/// The CORS layer is outermost so that every response leaving the process
/// carries the cross-origin headers: routed responses, the 404 fallback and
/// the panic-converted 500s alike. A response without them is unusable by
/// browser callers.
pub fn build_router(state: RelayState) -> Router {
    let mut router = Router::new()
        .route("/graphql", post(graphql::handle))
        .route("/health", get(health_handler));

    if state.config.relay.streaming.is_enabled() {
        router = router.route("/chat/stream", post(sse::handle));
    }

    router
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors_layer())
        .with_state(state)
}

/// Fixed cross-origin header set, preflight included
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(86400))
}

/// Convert any unhandled fault into the uniform 500 JSON body
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = %detail, "Unhandled fault while serving request");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}

/// Run the relay server
pub async fn run_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let streaming = config.relay.streaming.is_enabled();
    let upstream = config.upstream.base_url().to_string();

    let state = RelayState::new(config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("deepseek-relay listening on {}", addr);
    tracing::info!("Relaying to {}", upstream);
    if streaming {
        tracing::info!("Streaming route /chat/stream enabled");
    }

    Ok(axum::serve(listener, app).await?)
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Fixed response for unmatched routes
async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
