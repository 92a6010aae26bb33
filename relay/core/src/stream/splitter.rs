//! Frame Splitter
//!
//! Turns arbitrarily chunked bytes into complete `data:` lines.
//!
//! The upstream is free to cut its byte stream anywhere, including inside a
//! multi-byte UTF-8 sequence or between `\r` and `\n`. The splitter therefore
//! buffers raw bytes (not text) and only decodes a line once its terminator has
//! arrived. The frames produced for a given byte sequence are the same however
//! that sequence was chunked.

/// Prefix that marks a line as an event frame
pub const FRAME_PREFIX: &str = "data:";

/// One complete event frame extracted from the byte stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    /// Frame payload with the prefix removed
    pub payload: String,
}

impl RawFrame {
    /// Build a frame from a complete line
    ///
    /// Returns `None` for lines without the frame prefix. A single space after
    /// the prefix is part of the framing and is removed.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        let rest = line.strip_prefix(FRAME_PREFIX)?;
        let payload = rest.strip_prefix(' ').unwrap_or(rest);
        Some(Self {
            payload: payload.to_string(),
        })
    }
}

/// Incremental line splitter over a byte stream
#[derive(Debug, Default)]
pub struct FrameSplitter {
    /// Bytes of the trailing, not yet terminated line
    pending: Vec<u8>,
    /// Lines dropped because they lacked the frame prefix
    dropped_lines: u64,
}

impl FrameSplitter {
    /// Create an empty splitter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];

            let mut line = std::mem::take(&mut self.pending);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.emit(&line, &mut frames);
        }

        self.pending.extend_from_slice(rest);
        frames
    }

    /// End of stream
    ///
    /// An unterminated trailing line is discarded. Returns its length in bytes.
    pub fn finish(&mut self) -> usize {
        let discarded = self.pending.len();
        if discarded > 0 {
            tracing::debug!(bytes = discarded, "Discarding unterminated trailing line");
        }
        self.pending.clear();
        discarded
    }

    /// Bytes currently held for the trailing partial line
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of complete lines dropped for lacking the frame prefix
    #[must_use]
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }

    fn emit(&mut self, line: &[u8], frames: &mut Vec<RawFrame>) {
        let text = String::from_utf8_lossy(line);
        match RawFrame::from_line(&text) {
            Some(frame) => frames.push(frame),
            None => {
                if !text.is_empty() {
                    self.dropped_lines += 1;
                }
            }
        }
    }
}
