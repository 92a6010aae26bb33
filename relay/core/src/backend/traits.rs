//! Chat Upstream Traits
//!
//! Trait definitions for the upstream chat service a turn is relayed to.
//!
//! # Design Philosophy
//!
//! The [`ChatUpstream`] trait covers exactly one exchange: post an
//! authenticated turn and hand back the raw response. It does not parse the
//! body, retry, or buffer anything. The relay layer owns the byte pipe and
//! the stream layer owns the parsing.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::messages::{MessageRole, SessionId, TurnId};

/// Raw response body: chunks in upstream order, ending with an optional error
pub type ByteStream = BoxStream<'static, Result<Bytes, RelayError>>;

/// One message of the conversation as sent upstream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Who sent the message
    pub role: MessageRole,
    /// Message text
    pub text: String,
}

impl HistoryMessage {
    /// A user message
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            text: text.into(),
        }
    }

    /// An assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            text: text.into(),
        }
    }
}

/// An authenticated conversation turn
#[derive(Clone, Debug)]
pub struct TurnRequest {
    /// Target session
    pub session_id: SessionId,
    /// Turn being submitted
    pub turn_id: TurnId,
    /// Conversation so far, oldest first
    pub prior_history: Vec<HistoryMessage>,
    /// The new user message
    pub new_message: String,
    /// Bearer token to forward (overrides the configured one)
    pub auth_token: Option<String>,
}

impl TurnRequest {
    /// Create a request with no prior history
    pub fn new(session_id: SessionId, new_message: impl Into<String>) -> Self {
        Self {
            session_id,
            turn_id: TurnId::new(),
            prior_history: Vec::new(),
            new_message: new_message.into(),
            auth_token: None,
        }
    }

    /// Set the prior history
    #[must_use]
    pub fn with_history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.prior_history = history;
        self
    }

    /// Set the bearer token
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the turn ID
    #[must_use]
    pub fn with_turn_id(mut self, turn_id: TurnId) -> Self {
        self.turn_id = turn_id;
        self
    }

    /// Build a request from a client-owned message list
    ///
    /// The list must end with the new user message.
    pub fn from_wire_messages(
        session_id: SessionId,
        mut messages: Vec<HistoryMessage>,
    ) -> Result<Self, RelayError> {
        match messages.pop() {
            Some(last) if last.role == MessageRole::User => {
                Ok(Self::new(session_id, last.text).with_history(messages))
            }
            Some(_) => Err(RelayError::InvalidInput(
                "the last message must come from the user".to_string(),
            )),
            None => Err(RelayError::InvalidInput("no messages to send".to_string())),
        }
    }

    /// Prior history followed by the new message
    #[must_use]
    pub fn wire_messages(&self) -> Vec<HistoryMessage> {
        let mut messages = self.prior_history.clone();
        messages.push(HistoryMessage::user(self.new_message.clone()));
        messages
    }
}

/// Raw upstream response
pub struct UpstreamResponse {
    /// HTTP status code
    pub status: u16,
    /// `Content-Type` header, if present
    pub content_type: Option<String>,
    /// Body stream, `None` when the upstream sent no body
    pub body: Option<ByteStream>,
}

impl UpstreamResponse {
    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Upstream chat service
///
/// Implement this trait to relay turns to a different kind of service.
#[async_trait]
pub trait ChatUpstream: Send + Sync {
    /// Upstream name for logging
    fn name(&self) -> &str;

    /// Check if the upstream is reachable
    async fn health_check(&self) -> bool;

    /// Submit a turn and return the raw response
    ///
    /// Connection failures are errors. Non-success statuses are not: they
    /// come back as a response so the caller can read the body.
    async fn open_turn(&self, request: &TurnRequest) -> Result<UpstreamResponse, RelayError>;
}

/// Upstream connection configuration
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    /// Base URL, e.g. `http://127.0.0.1:8000`
    pub base_url: String,
    /// Path prefix; the session ID is appended
    pub chat_path: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Bearer token used when the request carries none
    pub auth_token: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            chat_path: "/api/chat".to_string(),
            connect_timeout: Duration::from_secs(10),
            auth_token: None,
        }
    }
}

impl UpstreamConfig {
    /// URL a turn for `session_id` is posted to
    #[must_use]
    pub fn turn_url(&self, session_id: &SessionId) -> String {
        let base = self.base_url.trim_end_matches('/');
        match self.chat_path.trim_matches('/') {
            "" => format!("{base}/{session_id}"),
            path => format!("{base}/{path}/{session_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_messages_order() {
        let request = TurnRequest::new(SessionId::from("s1"), "second question")
            .with_history(vec![
                HistoryMessage::user("first question"),
                HistoryMessage::assistant("first answer"),
            ]);

        assert_eq!(
            request.wire_messages(),
            vec![
                HistoryMessage::user("first question"),
                HistoryMessage::assistant("first answer"),
                HistoryMessage::user("second question"),
            ]
        );
    }

    #[test]
    fn test_wire_message_json() {
        let json = serde_json::to_value(HistoryMessage::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "ai", "text": "hi"}));
    }

    #[test]
    fn test_from_wire_messages() {
        let request = TurnRequest::from_wire_messages(
            SessionId::from("s1"),
            vec![
                HistoryMessage::user("q1"),
                HistoryMessage::assistant("a1"),
                HistoryMessage::user("q2"),
            ],
        )
        .unwrap();
        assert_eq!(request.new_message, "q2");
        assert_eq!(request.prior_history.len(), 2);

        let err = TurnRequest::from_wire_messages(
            SessionId::from("s1"),
            vec![HistoryMessage::assistant("a1")],
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));

        assert!(TurnRequest::from_wire_messages(SessionId::from("s1"), Vec::new()).is_err());
    }

    #[test]
    fn test_turn_url() {
        let config = UpstreamConfig {
            base_url: "http://localhost:8000/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.turn_url(&SessionId::from("abc")),
            "http://localhost:8000/api/chat/abc"
        );
    }
}
