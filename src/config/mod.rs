mod loader;

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use loader::load_config;

/// Environment variable that overrides the configured upstream credential.
pub const API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Relay server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8787
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Upstream completion provider configuration
#[derive(Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Provider base URL (e.g. "https://api.deepseek.com")
    #[serde(default = "default_upstream_url")]
    pub url: String,
    /// Model identifier sent with every completion request
    #[serde(default = "default_model")]
    pub model: String,
    /// Bearer credential; usually supplied via DEEPSEEK_API_KEY instead
    #[serde(default)]
    pub api_key: Option<String>,
    /// Sampling temperature, must lie in [0, 2]
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum output length, must be > 0
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_upstream_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_timeout() -> u64 {
    300
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_timeout(),
        }
    }
}

// The credential must never reach logs, so Debug redacts it.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl UpstreamConfig {
    /// Returns the base URL with trailing slash stripped
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Full URL of the chat completions endpoint
    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url())
    }
}

/// Relay behavior configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub streaming: StreamingMode,
}

/// Streaming deployment selector
///
/// The GraphQL endpoint is the canonical contract; the SSE route is mounted
/// only when the deployment opts into the streaming variant.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    #[default]
    Disabled,
    Sse,
}

impl StreamingMode {
    pub fn is_enabled(&self) -> bool {
        matches!(self, StreamingMode::Sse)
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        load_config(path)
    }

    /// Check invariants that must hold before any request is served
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.url.trim().is_empty() {
            return Err(ConfigError::Validation("upstream.url is empty".to_string()));
        }
        if self.upstream.model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "upstream.model is empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.upstream.temperature) {
            return Err(ConfigError::Validation(format!(
                "upstream.temperature {} outside [0, 2]",
                self.upstream.temperature
            )));
        }
        if self.upstream.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "upstream.max_tokens must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}
