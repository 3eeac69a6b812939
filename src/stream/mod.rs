//! Typed streaming events and their SSE decoder

mod decoder;

pub use decoder::{decode_stream, SseDecoder, StreamHandler};

/// One event of a streaming response
///
/// Closed set of kinds; anything else on the wire maps to [`Unknown`] and is
/// ignored by policy so new event kinds can ship without breaking consumers.
///
/// [`Unknown`]: StreamEvent::Unknown
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental fragment of the generated text
    TextDelta(String),
    /// File attachment descriptor
    FilePart(serde_json::Value),
    /// Side-channel payload (e.g. token usage)
    DataPart(serde_json::Value),
    /// Terminal failure; no further events follow
    ErrorPart(String),
    /// Unrecognized event kind
    Unknown,
}

/// Wire names of the named SSE event kinds
pub mod kind {
    pub const TEXT: &str = "text";
    pub const FILE: &str = "file";
    pub const DATA: &str = "data";
    pub const ERROR: &str = "error";
}
