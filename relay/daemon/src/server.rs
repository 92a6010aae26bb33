//! HTTP Relay Server
//!
//! Puts the relay behind an HTTP endpoint for browser clients:
//!
//! ```text
//!   POST /api/sessions/{session_id}/messages   {"messages": [...]}
//!        │
//!        ▼
//!   Relay::open ──► upstream POST {chat_path}/{session_id}
//!        │
//!        ▼
//!   200 text/event-stream, upstream bytes unmodified
//! ```
//!
//! The client owns the conversation: it sends the whole message list, ending
//! with the new user message, and parses the event stream itself. The server
//! never decodes frames.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        header::{AUTHORIZATION, CACHE_CONTROL, CONNECTION, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use relay_core::{ChatUpstream, HistoryMessage, Relay, RelayError, SessionId, TurnRequest};

/// Body of a relay request
#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    /// Conversation so far, ending with the new user message
    pub messages: Vec<HistoryMessage>,
}

/// Shared handler state
pub struct AppState<U: ChatUpstream> {
    relay: Arc<Relay<U>>,
    max_input_length: usize,
}

impl<U: ChatUpstream> Clone for AppState<U> {
    fn clone(&self) -> Self {
        Self {
            relay: Arc::clone(&self.relay),
            max_input_length: self.max_input_length,
        }
    }
}

impl<U: ChatUpstream + 'static> AppState<U> {
    /// Create handler state
    pub fn new(relay: Arc<Relay<U>>, max_input_length: usize) -> Self {
        Self {
            relay,
            max_input_length,
        }
    }
}

/// Build the relay router
pub fn router<U: ChatUpstream + 'static>(state: AppState<U>) -> Router {
    Router::new()
        .route("/health", get(health::<U>))
        .route("/api/sessions/{session_id}/messages", post(relay_messages::<U>))
        .with_state(state)
}

async fn health<U: ChatUpstream + 'static>(State(state): State<AppState<U>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "upstream": state.relay.upstream().name(),
    }))
}

async fn relay_messages<U: ChatUpstream + 'static>(
    State(state): State<AppState<U>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RelayRequest>,
) -> Response {
    let mut request =
        match TurnRequest::from_wire_messages(SessionId::from(session_id), body.messages) {
            Ok(request) => request,
            Err(e) => return error_response(&e),
        };

    if request.new_message.trim().is_empty() {
        return error_response(&RelayError::InvalidInput("message is empty".to_string()));
    }
    if request.new_message.len() > state.max_input_length {
        return error_response(&RelayError::InvalidInput(format!(
            "message is {} bytes, limit is {}",
            request.new_message.len(),
            state.max_input_length
        )));
    }

    if let Some(token) = bearer_token(&headers) {
        request = request.with_auth_token(token);
    }

    info!(
        session_id = %request.session_id,
        turn_id = %request.turn_id,
        messages = request.prior_history.len() + 1,
        "Relay request"
    );

    match state.relay.open(&request).await {
        Ok(stream) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache, no-transform")
            .header(CONNECTION, "keep-alive")
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to build response").into_response()
            }),
        Err(e) => {
            warn!(session_id = %request.session_id, error = %e, "Relay request failed");
            error_response(&e)
        }
    }
}

/// Map a relay failure to the response the client sees
fn error_response(error: &RelayError) -> Response {
    match error {
        RelayError::UpstreamRejected { status, body } => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            format!("Error from backend: {body}"),
        )
            .into_response(),
        RelayError::EmptyUpstreamBody => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "The backend response does not contain a body.",
        )
            .into_response(),
        RelayError::InvalidInput(message) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": message })),
        )
            .into_response(),
        RelayError::Transport(_) | RelayError::Persistence(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": error.to_string() })),
        )
            .into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use relay_core::{HttpUpstream, RelayConfig, UpstreamConfig};
    use tower::ServiceExt;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SSE_BODY: &str = "data: {\"type\":\"thinking\",\"content\":\"Parsing query\"}\n\n\
data: {\"type\":\"final_answer\",\"content\":\"A stack is LIFO.\"}\n\n";

    fn app(server: &MockServer) -> Router {
        let upstream = HttpUpstream::new(UpstreamConfig {
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap();
        let relay = Arc::new(Relay::new(upstream, RelayConfig::default()));
        router(AppState::new(relay, 1024))
    }

    fn relay_request(session: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/sessions/{session}/messages"))
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, "Bearer user-token")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_relays_stream_unmodified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/s1"))
            .and(header("accept", "text/event-stream"))
            .and(header("authorization", "Bearer user-token"))
            .and(body_json(json!({
                "messages": [
                    {"role": "user", "text": "hi"},
                    {"role": "ai", "text": "hello"},
                    {"role": "user", "text": "What is a stack?"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let response = app(&server)
            .oneshot(relay_request(
                "s1",
                json!({"messages": [
                    {"role": "user", "text": "hi"},
                    {"role": "ai", "text": "hello"},
                    {"role": "user", "text": "What is a stack?"}
                ]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache, no-transform");
        assert_eq!(body_text(response).await, SSE_BODY);
    }

    #[tokio::test]
    async fn test_upstream_rejection_passes_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/s1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let response = app(&server)
            .oneshot(relay_request(
                "s1",
                json!({"messages": [{"role": "user", "text": "hi"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "Error from backend: overloaded");
    }

    #[tokio::test]
    async fn test_empty_upstream_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/s1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let response = app(&server)
            .oneshot(relay_request(
                "s1",
                json!({"messages": [{"role": "user", "text": "hi"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_text(response).await,
            "The backend response does not contain a body."
        );
    }

    #[tokio::test]
    async fn test_zero_byte_stream_is_relayed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("", "text/event-stream"))
            .mount(&server)
            .await;

        let response = app(&server)
            .oneshot(relay_request(
                "s1",
                json!({"messages": [{"role": "user", "text": "hi"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn test_last_message_must_be_user() {
        let server = MockServer::start().await;

        let response = app(&server)
            .oneshot(relay_request(
                "s1",
                json!({"messages": [{"role": "ai", "text": "hello"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("error"));
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let server = MockServer::start().await;
        let long = "x".repeat(2048);

        let response = app(&server)
            .oneshot(relay_request(
                "s1",
                json!({"messages": [{"role": "user", "text": long}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        let upstream = HttpUpstream::new(UpstreamConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        })
        .unwrap();
        let relay = Arc::new(Relay::new(upstream, RelayConfig::default()));
        let app = router(AppState::new(relay, 1024));

        let response = app
            .oneshot(relay_request(
                "s1",
                json!({"messages": [{"role": "user", "text": "hi"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("transport error"));
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start().await;
        let response = app(&server)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["upstream"], "http");
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc".to_string()));

        headers.insert(AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
