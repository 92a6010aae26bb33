//! Frame Decoder
//!
//! Classifies frames into [`ChatEvent`]s and normalizes the two response
//! shapes the upstream may produce.
//!
//! # Response Shapes
//!
//! ```text
//!   text/event-stream, text/plain ──► FrameSplitter ──► decode_frame ──► events
//!   anything else (incl. missing) ──► buffer body ──► decode_fallback_body ──► 1 event
//! ```
//!
//! Either way the caller sees the same `ChatEvent` sequence type and feeds it
//! to the same reducer.

use serde_json::{Map, Value};

use super::splitter::{FrameSplitter, RawFrame};
use crate::events::{ChatEvent, FINAL_ANSWER_TYPE, THINKING_TYPE};

/// Placeholder answer for a fallback body with neither `content` nor `message`
pub const FALLBACK_PLACEHOLDER: &str = "Received response";

/// Upper bound on a buffered single-object body
pub const MAX_SINGLE_OBJECT_BYTES: usize = 10 * 1024 * 1024;

/// Parse a JSON object, `None` for anything else
fn parse_object(text: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(text) {
        Ok(Value::Object(object)) => Some(object),
        Ok(_) => None,
        Err(e) => {
            tracing::trace!(error = %e, "Payload is not JSON");
            None
        }
    }
}

/// A field of the object, only when it holds a string
///
/// Other fields never affect decoding, whatever their type.
fn string_field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

/// Decode one frame
///
/// Never fails: anything that is not a JSON object with a usable field becomes
/// [`ChatEvent::Unrecognized`].
#[must_use]
pub fn decode_frame(frame: &RawFrame) -> ChatEvent {
    decode_payload(&frame.payload)
}

/// Decode a frame payload
///
/// Only `type` and `content` are read.
#[must_use]
pub fn decode_payload(payload: &str) -> ChatEvent {
    let Some(object) = parse_object(payload.trim().as_bytes()) else {
        return ChatEvent::Unrecognized;
    };

    let content = string_field(&object, "content").map(str::to_string);
    match (string_field(&object, "type"), content) {
        (Some(THINKING_TYPE), Some(content)) => ChatEvent::Thinking { content },
        (Some(FINAL_ANSWER_TYPE), Some(content)) => ChatEvent::FinalAnswer { content },
        (Some(THINKING_TYPE | FINAL_ANSWER_TYPE), None) => ChatEvent::Unrecognized,
        (_, Some(content)) if !content.is_empty() => ChatEvent::RawContent { content },
        _ => ChatEvent::Unrecognized,
    }
}

/// Decode a complete non-streaming body
///
/// The body always yields an answer: the first non-empty string among
/// `content` and `message`, else the placeholder. A body that is not a JSON
/// object yields the placeholder too.
#[must_use]
pub fn decode_fallback_body(body: &[u8]) -> ChatEvent {
    let object = parse_object(body).unwrap_or_else(|| {
        tracing::debug!(bytes = body.len(), "Fallback body is not a JSON object");
        Map::new()
    });

    let content = ["content", "message"]
        .into_iter()
        .filter_map(|key| string_field(&object, key))
        .find(|text| !text.is_empty())
        .unwrap_or(FALLBACK_PLACEHOLDER)
        .to_string();

    ChatEvent::FinalAnswer { content }
}

/// Shape of an upstream response body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseShape {
    /// Newline-delimited `data:` frames
    EventStream,
    /// One JSON object
    SingleObject,
}

impl ResponseShape {
    /// Pick the shape from a `Content-Type` header value
    #[must_use]
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.contains("text/event-stream") || ct.contains("text/plain") => {
                Self::EventStream
            }
            _ => Self::SingleObject,
        }
    }
}

/// Decoding statistics for one turn
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Bytes consumed
    pub bytes: u64,
    /// Frames decoded into a recognized event
    pub frames_decoded: u64,
    /// Frames that decoded as `Unrecognized`
    pub frames_skipped: u64,
}

/// Incremental decoder for one upstream body
///
/// The single entry point for both response shapes.
#[derive(Debug)]
pub struct EventDecoder {
    shape: ResponseShape,
    splitter: FrameSplitter,
    body: Vec<u8>,
    overflowed: bool,
    stats: DecoderStats,
}

impl EventDecoder {
    /// Create a decoder for a body of the given shape
    #[must_use]
    pub fn new(shape: ResponseShape) -> Self {
        Self {
            shape,
            splitter: FrameSplitter::new(),
            body: Vec::new(),
            overflowed: false,
            stats: DecoderStats::default(),
        }
    }

    /// Shape this decoder was created for
    #[must_use]
    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    /// Feed a chunk and return the events it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ChatEvent> {
        self.stats.bytes += chunk.len() as u64;

        match self.shape {
            ResponseShape::EventStream => {
                let frames = self.splitter.push(chunk);
                frames.iter().map(|frame| self.classify(frame)).collect()
            }
            ResponseShape::SingleObject => {
                if self.body.len() + chunk.len() > MAX_SINGLE_OBJECT_BYTES {
                    if !self.overflowed {
                        tracing::warn!(
                            limit = MAX_SINGLE_OBJECT_BYTES,
                            "Single-object body exceeds limit, ignoring the rest"
                        );
                    }
                    self.overflowed = true;
                } else {
                    self.body.extend_from_slice(chunk);
                }
                Vec::new()
            }
        }
    }

    /// End of body
    ///
    /// For an event stream the unterminated trailing line is dropped. For a
    /// single object the buffered body is decoded now; an empty body yields
    /// nothing so the turn falls back.
    pub fn finish(&mut self) -> Vec<ChatEvent> {
        match self.shape {
            ResponseShape::EventStream => {
                self.splitter.finish();
                Vec::new()
            }
            ResponseShape::SingleObject => {
                let body = std::mem::take(&mut self.body);
                if body.iter().all(u8::is_ascii_whitespace) {
                    return Vec::new();
                }
                self.stats.frames_decoded += 1;
                vec![decode_fallback_body(&body)]
            }
        }
    }

    /// Statistics so far
    #[must_use]
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    fn classify(&mut self, frame: &RawFrame) -> ChatEvent {
        let event = decode_frame(frame);
        if event == ChatEvent::Unrecognized {
            self.stats.frames_skipped += 1;
            tracing::debug!(payload_len = frame.payload.len(), "Skipping unrecognized frame");
        } else {
            self.stats.frames_decoded += 1;
        }
        event
    }
}
