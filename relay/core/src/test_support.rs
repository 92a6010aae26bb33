//! Scripted upstream for unit tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::backend::{ByteStream, ChatUpstream, TurnRequest, UpstreamResponse};
use crate::error::RelayError;

/// Sets its flag when dropped
pub(crate) struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Upstream that replays a fixed response
pub(crate) struct ScriptedUpstream {
    pub status: u16,
    pub content_type: Option<String>,
    pub chunks: Vec<Result<Bytes, RelayError>>,
    pub has_body: bool,
    /// Keep the body open after the scripted chunks
    pub hang: bool,
    pub body_dropped: Arc<AtomicBool>,
    pub requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedUpstream {
    pub fn event_stream(chunks: &[&str]) -> Self {
        Self {
            status: 200,
            content_type: Some("text/event-stream".to_string()),
            chunks: chunks
                .iter()
                .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
                .collect(),
            has_body: true,
            hang: false,
            body_dropped: Arc::new(AtomicBool::new(false)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_content_type(mut self, content_type: Option<&str>) -> Self {
        self.content_type = content_type.map(str::to_string);
        self
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.chunks.push(Err(RelayError::transport(message)));
        self
    }

    pub fn without_body(mut self) -> Self {
        self.has_body = false;
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn recorded(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatUpstream for ScriptedUpstream {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn open_turn(&self, request: &TurnRequest) -> Result<UpstreamResponse, RelayError> {
        self.requests.lock().unwrap().push(request.clone());

        let body = self.has_body.then(|| {
            let flag = DropFlag(Arc::clone(&self.body_dropped));
            let tail: ByteStream = if self.hang {
                futures::stream::pending().boxed()
            } else {
                futures::stream::empty().boxed()
            };
            futures::stream::iter(self.chunks.clone())
                .chain(tail)
                .map(move |item| {
                    let _held = &flag;
                    item
                })
                .boxed()
        });

        Ok(UpstreamResponse {
            status: self.status,
            content_type: self.content_type.clone(),
            body,
        })
    }
}
