//! Chat Events
//!
//! The typed application events decoded from the upstream byte stream.
//! Every frame, recognized or not, becomes exactly one [`ChatEvent`]; the turn
//! reducer decides what each event means for the accumulated state.

use serde::{Deserialize, Serialize};

/// Discriminator value of an intermediate reasoning frame
pub const THINKING_TYPE: &str = "thinking";

/// Discriminator value of the terminal answer frame
pub const FINAL_ANSWER_TYPE: &str = "final_answer";

/// One decoded frame of a chat turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// An intermediate reasoning note
    Thinking {
        /// The note text
        content: String,
    },
    /// The terminal, authoritative answer for the turn
    FinalAnswer {
        /// The answer text
        content: String,
    },
    /// Content without an explicit tag
    ///
    /// Counts as the answer only while no final answer has been accepted.
    RawContent {
        /// The content text
        content: String,
    },
    /// A frame that did not decode as structured data
    Unrecognized,
}

impl ChatEvent {
    /// Whether this event can end the turn
    #[must_use]
    pub fn is_answer(&self) -> bool {
        matches!(self, Self::FinalAnswer { .. } | Self::RawContent { .. })
    }

    /// The carried content, if any
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Thinking { content }
            | Self::FinalAnswer { content }
            | Self::RawContent { content } => Some(content),
            Self::Unrecognized => None,
        }
    }

    /// Short name for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::FinalAnswer { .. } => "final_answer",
            Self::RawContent { .. } => "raw_content",
            Self::Unrecognized => "unrecognized",
        }
    }
}
