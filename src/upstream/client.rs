//! Upstream completion client
//!
//! Issues exactly one outbound request per call and maps every failure into
//! [`UpstreamError`]. Nothing is retried here; retry policy belongs to the
//! caller.

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use reqwest::header;
use std::sync::Arc;

use crate::api::{ChatCompletionRequest, ChatCompletionResponse, StreamChunk, Usage};
use crate::config::AppConfig;

/// Generation parameters for a single completion call
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationParams {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.upstream.model.clone(),
            temperature: config.upstream.temperature,
            max_tokens: config.upstream.max_tokens,
        }
    }

    fn validate(&self) -> Result<(), UpstreamError> {
        if self.model.trim().is_empty() {
            return Err(UpstreamError::InvalidRequest("model is empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(UpstreamError::InvalidRequest(format!(
                "temperature {} outside [0, 2]",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(UpstreamError::InvalidRequest(
                "max_tokens must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Rejected locally, before any network call
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider answered with a non-success status; body kept for logs only
    #[error("upstream returned status {status}")]
    Status { status: u16, body: String },

    /// Provider answered 2xx but the envelope was not usable
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("upstream network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// One item of a streaming completion
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamDelta {
    /// Incremental fragment of the generated text
    Content(String),
    /// Token accounting, carried by the provider's final chunk
    Usage(Usage),
}

/// Client for the DeepSeek-compatible chat completion API
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    config: Arc<AppConfig>,
}

impl UpstreamClient {
    pub fn new(client: reqwest::Client, config: Arc<AppConfig>) -> Self {
        Self { client, config }
    }

    /// Generation parameters taken from process-wide configuration
    pub fn default_params(&self) -> GenerationParams {
        GenerationParams::from_config(&self.config)
    }

    /// Request a single completion and return the generated text
    pub async fn complete(&self, prompt: &str) -> Result<String, UpstreamError> {
        self.complete_with(prompt, &self.default_params()).await
    }

    /// Request a single completion with explicit generation parameters
    pub async fn complete_with(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, UpstreamError> {
        let request = self.build_request(prompt, params, false)?;
        let response = self.send(request).await?;

        let body = response.text().await?;
        let envelope: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            UpstreamError::MalformedResponse(format!("invalid completion envelope: {e}"))
        })?;

        envelope
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| {
                UpstreamError::MalformedResponse("response carried no completion text".to_string())
            })
    }

    /// Request a streaming completion
    ///
    /// Yields content deltas in arrival order, then the provider's usage
    /// report if the final chunk carries one. A transport failure surfaces as
    /// one trailing `Err` item and ends the stream.
    pub async fn complete_stream(
        &self,
        prompt: &str,
    ) -> Result<
        impl Stream<Item = Result<UpstreamDelta, UpstreamError>> + Send + 'static,
        UpstreamError,
    > {
        let request = self.build_request(prompt, &self.default_params(), true)?;
        let response = self.send(request).await?;
        Ok(delta_stream(response.bytes_stream()))
    }

    fn build_request(
        &self,
        prompt: &str,
        params: &GenerationParams,
        streaming: bool,
    ) -> Result<reqwest::RequestBuilder, UpstreamError> {
        if prompt.trim().is_empty() {
            return Err(UpstreamError::InvalidRequest("prompt is empty".to_string()));
        }
        params.validate()?;

        let api_key = self.config.upstream.api_key.as_deref().ok_or_else(|| {
            UpstreamError::InvalidRequest("no upstream credential configured".to_string())
        })?;

        let mut body = ChatCompletionRequest::user_prompt(
            &params.model,
            prompt,
            params.temperature,
            params.max_tokens,
        );
        if streaming {
            body = body.streaming();
        }

        Ok(self
            .client
            .post(self.config.upstream.completions_url())
            .header(header::AUTHORIZATION, format!("Bearer {api_key}"))
            .json(&body))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, UpstreamError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Parse the provider's SSE byte stream into content deltas
///
/// Carries partial lines across chunk boundaries; a `data: [DONE]` marker or
/// a transport error ends the stream. Unparseable data lines are skipped
/// (keep-alive noise), not fatal.
fn delta_stream<S>(source: S) -> impl Stream<Item = Result<UpstreamDelta, UpstreamError>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send,
{
    let mut carry: Vec<u8> = Vec::new();
    let mut finished = false;

    source.flat_map(move |chunk_result| {
        let mut out: Vec<Result<UpstreamDelta, UpstreamError>> = Vec::new();
        if finished {
            return stream::iter(out);
        }

        let chunk = match chunk_result {
            Ok(chunk) => chunk,
            Err(e) => {
                finished = true;
                out.push(Err(UpstreamError::Network(e)));
                return stream::iter(out);
            }
        };

        carry.extend_from_slice(&chunk);
        while let Some(pos) = carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = carry.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                finished = true;
                break;
            }

            match serde_json::from_str::<StreamChunk>(data) {
                Ok(parsed) => {
                    if let Some(content) = parsed
                        .choices
                        .first()
                        .and_then(|choice| choice.delta.content.clone())
                    {
                        if !content.is_empty() {
                            out.push(Ok(UpstreamDelta::Content(content)));
                        }
                    }
                    if let Some(usage) = parsed.usage {
                        out.push(Ok(UpstreamDelta::Usage(usage)));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, data = %data, "Skipping unparseable stream chunk");
                }
            }
        }

        stream::iter(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, RelayConfig, ServerConfig, UpstreamConfig};

    fn test_client(api_key: Option<&str>) -> UpstreamClient {
        let config = AppConfig {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                api_key: api_key.map(str::to_string),
                ..Default::default()
            },
            relay: RelayConfig::default(),
        };
        UpstreamClient::new(reqwest::Client::new(), Arc::new(config))
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected_locally() {
        let client = test_client(Some("test-key"));
        let result = client.complete("   ").await;
        assert!(matches!(result, Err(UpstreamError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_out_of_range_params_rejected_locally() {
        let client = test_client(Some("test-key"));

        let mut params = client.default_params();
        params.temperature = 2.5;
        let result = client.complete_with("hi", &params).await;
        assert!(matches!(result, Err(UpstreamError::InvalidRequest(_))));

        let mut params = client.default_params();
        params.max_tokens = 0;
        let result = client.complete_with("hi", &params).await;
        assert!(matches!(result, Err(UpstreamError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_missing_credential_rejected_locally() {
        let client = test_client(None);
        let result = client.complete("hi").await;
        assert!(matches!(result, Err(UpstreamError::InvalidRequest(_))));
    }

    #[test]
    fn test_status_error_display_omits_body() {
        // The body is log-only detail; Display must not leak it
        let err = UpstreamError::Status {
            status: 500,
            body: "secret upstream detail".to_string(),
        };
        assert!(!err.to_string().contains("secret"));
        assert!(err.to_string().contains("500"));
    }

    async fn collect_deltas(input: Vec<Result<Bytes, reqwest::Error>>) -> Vec<UpstreamDelta> {
        delta_stream(stream::iter(input))
            .filter_map(|item| async { item.ok() })
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_delta_stream_parses_chunks() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" world\"},\"finish_reason\":null}]}\n\n",
            "data: [DONE]\n\n",
        );
        let deltas = collect_deltas(vec![Ok(Bytes::from_static(body.as_bytes()))]).await;
        assert_eq!(
            deltas,
            vec![
                UpstreamDelta::Content("Hello".to_string()),
                UpstreamDelta::Content(" world".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_delta_stream_reassembles_split_lines() {
        let frame = "data: {\"choices\":[{\"delta\":{\"content\":\"Recursion\"},\"finish_reason\":null}]}\n\ndata: [DONE]\n\n";
        // Split mid-line to force carry across feeds
        let (a, b) = frame.split_at(17);
        let deltas = collect_deltas(vec![
            Ok(Bytes::copy_from_slice(a.as_bytes())),
            Ok(Bytes::copy_from_slice(b.as_bytes())),
        ])
        .await;
        assert_eq!(deltas, vec![UpstreamDelta::Content("Recursion".to_string())]);
    }

    #[tokio::test]
    async fn test_delta_stream_ignores_after_done() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"},\"finish_reason\":null}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"},\"finish_reason\":null}]}\n\n",
        );
        let deltas = collect_deltas(vec![Ok(Bytes::from_static(body.as_bytes()))]).await;
        assert_eq!(deltas, vec![UpstreamDelta::Content("a".to_string())]);
    }

    #[tokio::test]
    async fn test_delta_stream_yields_usage() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":1,\"total_tokens\":4}}\n\n",
            "data: [DONE]\n\n",
        );
        let deltas = collect_deltas(vec![Ok(Bytes::from_static(body.as_bytes()))]).await;
        assert_eq!(deltas.len(), 2);
        match &deltas[1] {
            UpstreamDelta::Usage(usage) => assert_eq!(usage.total_tokens, 4),
            other => panic!("expected usage delta, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delta_stream_skips_malformed_chunks() {
        let body = concat!(
            "data: not json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":null}]}\n\n",
            "data: [DONE]\n\n",
        );
        let deltas = collect_deltas(vec![Ok(Bytes::from_static(body.as_bytes()))]).await;
        assert_eq!(deltas, vec![UpstreamDelta::Content("ok".to_string())]);
    }
}
