//! Client for the upstream completion provider

mod client;

pub use client::{GenerationParams, UpstreamClient, UpstreamDelta, UpstreamError};
