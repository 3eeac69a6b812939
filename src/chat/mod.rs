//! Client-side conversation history
//!
//! Owns the ordered message history and folds streaming deltas into the open
//! assistant turn. Append-only, except that text deltas grow the single open
//! assistant message in place.

mod session;

pub use session::{ChatSession, SessionError};

use serde::Serialize;

use crate::api::{ChatMessage, Role};
use crate::stream::{StreamEvent, StreamHandler};

/// Fixed text shown when a streaming turn fails
pub const STREAM_FAILURE_MESSAGE: &str = "Something went wrong, please try again later.";

/// Ordered conversation history with at most one open assistant turn
#[derive(Debug, Clone, Default, Serialize)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    #[serde(skip)]
    open: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// True while an assistant turn is still receiving deltas
    pub fn is_turn_open(&self) -> bool {
        self.open
    }

    /// Append a user message and open the assistant turn
    ///
    /// Blank input is a no-op, as is submitting while a turn is still open
    /// (one in-flight submission at a time). Returns whether the prompt was
    /// accepted.
    pub fn submit(&mut self, prompt: &str) -> bool {
        if self.open || prompt.trim().is_empty() {
            return false;
        }
        self.messages.push(ChatMessage {
            role: Role::User,
            content: prompt.to_string(),
        });
        self.open = true;
        true
    }

    /// Fold one text delta into the history
    ///
    /// Grows the open assistant message if it is the last entry, otherwise
    /// starts a new open assistant message. Each delta is applied exactly
    /// once; identical deltas are not de-duplicated.
    pub fn push_delta(&mut self, text: &str) {
        if self.open {
            if let Some(last) = self.messages.last_mut() {
                if last.role == Role::Assistant {
                    last.content.push_str(text);
                    return;
                }
            }
        }
        self.messages.push(ChatMessage {
            role: Role::Assistant,
            content: text.to_string(),
        });
        self.open = true;
    }

    /// Record a streaming failure as its own assistant entry and close the turn
    pub fn stream_error(&mut self) {
        self.messages.push(ChatMessage {
            role: Role::Assistant,
            content: STREAM_FAILURE_MESSAGE.to_string(),
        });
        self.open = false;
    }

    /// Close the open turn; later deltas start a fresh assistant message
    pub fn end_turn(&mut self) {
        self.open = false;
    }

    /// Content of the latest assistant message, if any
    pub fn last_answer(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content.as_str())
    }
}

impl StreamHandler for Conversation {
    fn on_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::TextDelta(text) => self.push_delta(&text),
            StreamEvent::ErrorPart(_) => self.stream_error(),
            // side-channel payloads are not part of the history
            StreamEvent::FilePart(_) | StreamEvent::DataPart(_) | StreamEvent::Unknown => {}
        }
    }

    fn on_end(&mut self) {
        self.end_turn();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submit_blank_is_noop() {
        let mut conversation = Conversation::new();
        assert!(!conversation.submit(""));
        assert!(!conversation.submit("   "));
        assert!(!conversation.submit("\n\t"));
        assert!(conversation.messages().is_empty());
        assert!(!conversation.is_turn_open());
    }

    #[test]
    fn test_submit_appends_user_message() {
        let mut conversation = Conversation::new();
        assert!(conversation.submit("2+2?"));

        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.messages()[0].role, Role::User);
        assert_eq!(conversation.messages()[0].content, "2+2?");
        assert!(conversation.is_turn_open());
    }

    #[test]
    fn test_submit_rejected_while_turn_open() {
        let mut conversation = Conversation::new();
        assert!(conversation.submit("first"));
        assert!(!conversation.submit("second"));
        assert_eq!(conversation.messages().len(), 1);
    }

    #[test]
    fn test_deltas_fold_into_single_assistant_message() {
        let mut conversation = Conversation::new();
        conversation.submit("explain recursion");

        conversation.push_delta("Recur");
        assert_eq!(conversation.last_answer(), Some("Recur"));

        conversation.push_delta("sion is");
        assert_eq!(conversation.last_answer(), Some("Recursion is"));

        conversation.push_delta(" ...");
        assert_eq!(conversation.last_answer(), Some("Recursion is ..."));

        // one user entry plus exactly one assistant entry
        assert_eq!(conversation.messages().len(), 2);
    }

    #[test]
    fn test_identical_deltas_apply_each_time() {
        let mut conversation = Conversation::new();
        conversation.submit("hi");
        conversation.push_delta("ab");
        conversation.push_delta("ab");
        assert_eq!(conversation.last_answer(), Some("abab"));
    }

    #[test]
    fn test_non_streaming_answer() {
        let mut conversation = Conversation::new();
        conversation.submit("2+2?");
        conversation.push_delta("4");
        conversation.end_turn();

        let messages = conversation.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "2+2?");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "4");
    }

    #[test]
    fn test_stream_error_appends_new_entry() {
        let mut conversation = Conversation::new();
        conversation.submit("explain recursion");
        conversation.push_delta("Recur");
        conversation.stream_error();

        let messages = conversation.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "Recur");
        assert_eq!(messages[2].content, STREAM_FAILURE_MESSAGE);
        assert!(!conversation.is_turn_open());
    }

    #[test]
    fn test_deltas_after_closed_turn_start_fresh_message() {
        let mut conversation = Conversation::new();
        conversation.submit("one");
        conversation.push_delta("first answer");
        conversation.end_turn();

        conversation.submit("two");
        conversation.push_delta("second");

        let messages = conversation.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "first answer");
        assert_eq!(messages[3].content, "second");
    }

    #[test]
    fn test_stream_handler_wiring() {
        let mut conversation = Conversation::new();
        conversation.submit("hi");

        conversation.on_event(StreamEvent::TextDelta("a".to_string()));
        conversation.on_event(StreamEvent::DataPart(json!({"usage": {}})));
        conversation.on_event(StreamEvent::TextDelta("b".to_string()));
        conversation.on_end();

        assert_eq!(conversation.last_answer(), Some("ab"));
        assert!(!conversation.is_turn_open());
        // side-channel events never touched the history
        assert_eq!(conversation.messages().len(), 2);
    }
}
