//! Turn Messages
//!
//! Identifiers and the notifications the turn conductor sends to an observer.
//!
//! # Design Philosophy
//!
//! An observer (a terminal, a web page, a test harness) never sees raw frames.
//! It sees a short, ordered sequence of [`TurnUpdate`]s for each turn:
//!
//! ```text
//!   Thought #0 ─► Thought #1 ─► ... ─► Completed (exactly once)
//! ```
//!
//! The terminal `Completed` update always carries the full thoughts log next to
//! the final content, so the observer can persist it without having buffered
//! the intermediate updates itself.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turn identifier
///
/// Correlates one accumulated turn state with one user-visible message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    /// Generate a new unique turn ID
    ///
    /// Uses an atomic counter combined with a timestamp so IDs stay unique
    /// across restarts of the same process.
    #[must_use]
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("turn_{}_{count}", now_ms()))
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent a message
///
/// Serialized as `"user"` / `"ai"`, the roles the upstream chat service speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    /// User input
    #[serde(rename = "user")]
    User,
    /// AI assistant output
    #[serde(rename = "ai", alias = "assistant")]
    Assistant,
}

/// How a turn reached its terminal state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnResolution {
    /// The upstream delivered a final answer
    Answered,
    /// The stream closed without a final answer; an apology was synthesized
    FallbackTimeout,
    /// The stream failed mid-flight; the content describes the failure
    Errored,
}

impl TurnResolution {
    /// Whether the upstream actually answered
    #[must_use]
    pub fn is_answered(self) -> bool {
        matches!(self, Self::Answered)
    }
}

/// The finalized `{thoughts, final_content}` pair of one turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTurn {
    /// Turn this result belongs to
    pub turn_id: TurnId,
    /// Thinking steps in arrival order
    pub thoughts: Vec<String>,
    /// Final answer, apology, or error description
    pub final_content: String,
    /// How the turn ended
    pub resolution: TurnResolution,
}

/// Notifications from the turn conductor to an observer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnUpdate {
    /// A new thinking step arrived (non-terminal)
    Thought {
        /// Turn the thought belongs to
        turn_id: TurnId,
        /// The thought text
        content: String,
        /// Zero-based position of this thought in the turn's log
        index: usize,
    },
    /// The turn reached its terminal state (sent exactly once)
    Completed(CompletedTurn),
}

impl TurnUpdate {
    /// Whether this update ends the turn
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The turn this update belongs to
    #[must_use]
    pub fn turn_id(&self) -> &TurnId {
        match self {
            Self::Thought { turn_id, .. } => turn_id,
            Self::Completed(completed) => &completed.turn_id,
        }
    }
}

/// Get current timestamp in milliseconds
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
