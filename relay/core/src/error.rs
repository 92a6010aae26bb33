//! Relay Errors
//!
//! Stream-level failures of a chat turn. Per-frame decode failures never show
//! up here: the decoder turns them into [`ChatEvent::Unrecognized`] and the
//! stream keeps flowing.
//!
//! [`ChatEvent::Unrecognized`]: crate::events::ChatEvent::Unrecognized

use thiserror::Error;

/// Errors surfaced by the relay and the turn conductor
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The upstream answered with a non-success status
    ///
    /// The body text is carried as-is; it is never interpreted.
    #[error("upstream rejected the turn with status {status}: {body}")]
    UpstreamRejected {
        /// HTTP status returned by the upstream
        status: u16,
        /// Response body text
        body: String,
    },

    /// The upstream accepted the turn but sent no readable body
    #[error("the upstream response does not contain a body")]
    EmptyUpstreamBody,

    /// Connection or mid-stream I/O failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The turn input was rejected before reaching the upstream
    #[error("invalid turn input: {0}")]
    InvalidInput(String),

    /// The history store failed
    #[error("history store error: {0}")]
    Persistence(String),
}

impl RelayError {
    /// Build a transport error from any displayable failure
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Whether this error was raised before any byte was relayed
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::UpstreamRejected { .. } | Self::EmptyUpstreamBody | Self::InvalidInput(_)
        )
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
