//! Incremental SSE decoding and ordered event dispatch

use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::{kind, StreamEvent};

/// Consumer of decoded stream events
///
/// Callbacks are synchronous on purpose: the decoder must not process the
/// next event until the current one has been handled, which keeps arrival
/// order intact for the conversation fold.
pub trait StreamHandler {
    fn on_event(&mut self, event: StreamEvent);

    /// Natural end of the transport, no error event observed
    fn on_end(&mut self) {}
}

/// Incremental decoder for the named-event SSE wire format
///
/// Fed arbitrary byte chunks; partial lines are carried across feeds so an
/// event split anywhere by the transport decodes the same as unsplit input.
#[derive(Debug, Default)]
pub struct SseDecoder {
    carry: Vec<u8>,
    event_kind: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk, returning the events it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.carry.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                // frame separator
                self.event_kind = None;
            } else if let Some(name) = field_value(line, "event") {
                self.event_kind = Some(name.to_string());
            } else if let Some(payload) = field_value(line, "data") {
                events.push(decode_event(self.event_kind.as_deref(), payload));
                self.event_kind = None;
            }
            // comments (":"), id:, retry: and anything else are skipped
        }
        events
    }
}

/// Extract the value of `field: value` lines, tolerating a missing space
fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn decode_event(event_kind: Option<&str>, payload: &str) -> StreamEvent {
    match event_kind {
        Some(kind::TEXT) => match serde_json::from_str::<String>(payload) {
            Ok(text) => StreamEvent::TextDelta(text),
            Err(_) => StreamEvent::ErrorPart("malformed text event payload".to_string()),
        },
        Some(kind::FILE) => match serde_json::from_str(payload) {
            Ok(value) => StreamEvent::FilePart(value),
            Err(_) => StreamEvent::ErrorPart("malformed file event payload".to_string()),
        },
        Some(kind::DATA) => match serde_json::from_str(payload) {
            Ok(value) => StreamEvent::DataPart(value),
            Err(_) => StreamEvent::ErrorPart("malformed data event payload".to_string()),
        },
        // error payload is a JSON string when our relay produced it, but any
        // raw text is accepted so a failure surface never gets masked
        Some(kind::ERROR) => {
            let message = serde_json::from_str::<String>(payload)
                .unwrap_or_else(|_| payload.to_string());
            StreamEvent::ErrorPart(message)
        }
        _ => StreamEvent::Unknown,
    }
}

/// Drive a byte-chunk stream through the decoder, dispatching each event to
/// the handler exactly once, in arrival order.
///
/// An `ErrorPart` is terminal: it is dispatched and everything after it is
/// discarded, including events already sitting in the buffer. Transport
/// failures are reported as a synthetic `ErrorPart` rather than raised, so
/// the handler's error path is the single place failure lands.
pub async fn decode_stream<S, E, H>(source: S, handler: &mut H)
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
    H: StreamHandler,
{
    let mut decoder = SseDecoder::new();
    futures::pin_mut!(source);

    while let Some(chunk) = source.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "Stream transport failed");
                handler.on_event(StreamEvent::ErrorPart(
                    "stream transport failed".to_string(),
                ));
                return;
            }
        };

        for event in decoder.feed(&chunk) {
            match event {
                StreamEvent::Unknown => continue,
                StreamEvent::ErrorPart(message) => {
                    handler.on_event(StreamEvent::ErrorPart(message));
                    return;
                }
                event => handler.on_event(event),
            }
        }
    }

    handler.on_end();
}
