//! HTTP Upstream
//!
//! [`ChatUpstream`] over HTTP with `reqwest`.
//!
//! # Upstream API
//!
//! - `POST {base_url}{chat_path}/{session_id}` with `{"messages": [...]}`,
//!   `Accept: text/event-stream`, and an optional bearer token
//! - `GET {base_url}/` for a reachability check

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;

use super::traits::{ChatUpstream, HistoryMessage, TurnRequest, UpstreamConfig, UpstreamResponse};
use crate::error::RelayError;

/// Request body posted upstream
#[derive(Serialize)]
struct ChatBody {
    messages: Vec<HistoryMessage>,
}

/// HTTP chat upstream client
#[derive(Clone)]
pub struct HttpUpstream {
    /// Connection settings
    config: UpstreamConfig,
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpUpstream {
    /// Create a new HTTP upstream
    ///
    /// Only the connection phase is timed out; a streaming body may stay open
    /// for as long as the upstream keeps producing.
    pub fn new(config: UpstreamConfig) -> Result<Self, RelayError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Connection settings
    #[must_use]
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    fn bearer_token<'a>(&'a self, request: &'a TurnRequest) -> Option<&'a str> {
        request
            .auth_token
            .as_deref()
            .or(self.config.auth_token.as_deref())
            .filter(|token| !token.is_empty())
    }
}

#[async_trait]
impl ChatUpstream for HttpUpstream {
    fn name(&self) -> &str {
        "http"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(&self.config.base_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn open_turn(&self, request: &TurnRequest) -> Result<UpstreamResponse, RelayError> {
        let url = self.config.turn_url(&request.session_id);
        let body = ChatBody {
            messages: request.wire_messages(),
        };

        let mut builder = self
            .http_client
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(&body);
        if let Some(token) = self.bearer_token(request) {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(
            session_id = %request.session_id,
            turn_id = %request.turn_id,
            url = %url,
            messages = body.messages.len(),
            "Opening upstream turn"
        );

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        // An empty but present body is still a body: the turn falls back
        let body = if response_cannot_have_body(response.status()) {
            None
        } else {
            Some(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(RelayError::from))
                    .boxed(),
            )
        };

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Statuses whose responses never carry a body
fn response_cannot_have_body(status: StatusCode) -> bool {
    status.is_informational()
        || matches!(
            status,
            StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT | StatusCode::NOT_MODIFIED
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SessionId;

    #[test]
    fn test_request_token_overrides_config() {
        let upstream = HttpUpstream::new(UpstreamConfig {
            auth_token: Some("configured".to_string()),
            ..Default::default()
        })
        .unwrap();

        let plain = TurnRequest::new(SessionId::from("s"), "hi");
        assert_eq!(upstream.bearer_token(&plain), Some("configured"));

        let authed = plain.clone().with_auth_token("caller");
        assert_eq!(upstream.bearer_token(&authed), Some("caller"));
    }

    #[test]
    fn test_empty_token_is_not_sent() {
        let upstream = HttpUpstream::new(UpstreamConfig::default()).unwrap();
        let request = TurnRequest::new(SessionId::from("s"), "hi").with_auth_token("");
        assert_eq!(upstream.bearer_token(&request), None);
    }

    #[test]
    fn test_only_bodiless_statuses_drop_the_body() {
        assert!(response_cannot_have_body(StatusCode::NO_CONTENT));
        assert!(response_cannot_have_body(StatusCode::RESET_CONTENT));
        assert!(response_cannot_have_body(StatusCode::NOT_MODIFIED));
        assert!(!response_cannot_have_body(StatusCode::OK));
        assert!(!response_cannot_have_body(StatusCode::SERVICE_UNAVAILABLE));
    }
}
