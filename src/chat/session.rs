//! Interactive chat session against a running relay
//!
//! Submits prompts to the relay's streaming route and folds the decoded
//! events into the owned [`Conversation`].

use serde_json::json;
use std::io::Write;

use super::Conversation;
use crate::stream::{decode_stream, StreamEvent, StreamHandler};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to reach relay: {0}")]
    Network(#[from] reqwest::Error),

    #[error("relay returned status {0}")]
    Status(u16),
}

pub struct ChatSession {
    client: reqwest::Client,
    relay_url: String,
    conversation: Conversation,
    echo: bool,
}

impl ChatSession {
    pub fn new(client: reqwest::Client, relay_url: impl Into<String>) -> Self {
        Self {
            client,
            relay_url: relay_url.into(),
            conversation: Conversation::new(),
            echo: false,
        }
    }

    /// Print text deltas to stdout as they arrive
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Submit one prompt and consume the streamed answer to completion
    ///
    /// Returns `Ok(false)` when the prompt was not accepted (blank, or a turn
    /// is still open) — a no-op, nothing was sent. Stream-level failures land
    /// in the conversation as the fixed failure entry via the decoder's error
    /// event, so the history is always consistent when this returns.
    pub async fn ask(&mut self, prompt: &str) -> Result<bool, SessionError> {
        if !self.conversation.submit(prompt) {
            return Ok(false);
        }

        let url = format!("{}/chat/stream", self.relay_url.trim_end_matches('/'));
        let response = match self.client.post(url).json(&json!({ "prompt": prompt })).send().await
        {
            Ok(response) => response,
            Err(e) => {
                self.conversation.stream_error();
                return Err(e.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.conversation.stream_error();
            return Err(SessionError::Status(status.as_u16()));
        }

        let mut handler = EchoHandler {
            conversation: &mut self.conversation,
            echo: self.echo,
        };
        decode_stream(response.bytes_stream(), &mut handler).await;

        Ok(true)
    }
}

/// Forwards every event to the conversation, optionally echoing text to stdout
struct EchoHandler<'a> {
    conversation: &'a mut Conversation,
    echo: bool,
}

impl StreamHandler for EchoHandler<'_> {
    fn on_event(&mut self, event: StreamEvent) {
        match &event {
            StreamEvent::TextDelta(text) => {
                if self.echo {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
            }
            StreamEvent::ErrorPart(message) => {
                tracing::warn!(message = %message, "Stream reported an error");
            }
            StreamEvent::DataPart(value) => {
                tracing::debug!(payload = %value, "Stream side-channel data");
            }
            StreamEvent::FilePart(value) => {
                tracing::debug!(descriptor = %value, "Stream file part");
            }
            StreamEvent::Unknown => {}
        }
        self.conversation.on_event(event);
    }

    fn on_end(&mut self) {
        if self.echo {
            println!();
        }
        self.conversation.on_end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Role;
    use crate::chat::STREAM_FAILURE_MESSAGE;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_response(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
    }

    #[tokio::test]
    async fn test_ask_folds_streamed_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/stream"))
            .respond_with(sse_response(
                "event: text\ndata: \"Recur\"\n\nevent: text\ndata: \"sion is ...\"\n\n",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = ChatSession::new(reqwest::Client::new(), server.uri());
        let accepted = session.ask("explain recursion").await.unwrap();
        assert!(accepted);

        let messages = session.conversation().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Recursion is ...");
        assert!(!session.conversation().is_turn_open());
    }

    #[tokio::test]
    async fn test_ask_blank_prompt_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response(""))
            .expect(0)
            .mount(&server)
            .await;

        let mut session = ChatSession::new(reqwest::Client::new(), server.uri());
        let accepted = session.ask("   ").await.unwrap();
        assert!(!accepted);
        assert!(session.conversation().messages().is_empty());
    }

    #[tokio::test]
    async fn test_ask_stream_error_closes_turn_with_failure_entry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/stream"))
            .respond_with(sse_response(
                "event: text\ndata: \"Recur\"\n\nevent: error\ndata: \"upstream failed\"\n\n",
            ))
            .mount(&server)
            .await;

        let mut session = ChatSession::new(reqwest::Client::new(), server.uri());
        session.ask("explain recursion").await.unwrap();

        let messages = session.conversation().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "Recur");
        assert_eq!(messages[2].content, STREAM_FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn test_ask_relay_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/stream"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let mut session = ChatSession::new(reqwest::Client::new(), server.uri());
        let result = session.ask("hi").await;
        assert!(matches!(result, Err(SessionError::Status(502))));
        assert_eq!(
            session.conversation().last_answer(),
            Some(STREAM_FAILURE_MESSAGE)
        );
    }
}
