//! deepseek-relay: HTTP relay for the DeepSeek chat completion API
//!
//! Features:
//! - GraphQL endpoint relaying a single prompt to the completion provider
//! - Uniform error surface and CORS headers on every response
//! - Streaming deployment re-emitting the answer as named SSE events
//! - Client-side stream decoding and conversation aggregation

pub mod api;
pub mod chat;
pub mod config;
pub mod relay;
pub mod stream;
pub mod upstream;

pub use config::AppConfig;
pub use relay::{build_router, run_server, RelayState};
