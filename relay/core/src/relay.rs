//! Streaming Relay
//!
//! Pipes an upstream response body to one downstream consumer.
//!
//! # Design Philosophy
//!
//! The relay is a byte pipe and nothing else. It never parses frames, never
//! retries, and never holds more than one bounded channel worth of chunks:
//!
//! ```text
//!   upstream body ──► pump task ──► mpsc(channel_capacity) ──► RelayStream
//!                     (split to max_chunk_bytes)
//! ```
//!
//! The pump task owns the upstream body. Dropping the [`RelayStream`] closes
//! the channel, the pump notices on its next poll and drops the body, which
//! releases the upstream connection.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::backend::{ByteStream, ChatUpstream, TurnRequest};
use crate::error::RelayError;
use crate::messages::{SessionId, TurnId};
use crate::stream::ResponseShape;

/// Cap on the body text kept from a rejected response
pub const MAX_REJECTION_BODY_BYTES: usize = 64 * 1024;

/// Relay tuning
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Largest chunk forwarded downstream in one item
    pub max_chunk_bytes: usize,
    /// Chunks buffered between the pump and the consumer
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: 8192,
            channel_capacity: 32,
        }
    }
}

/// Upstream-facing relay
pub struct Relay<U: ChatUpstream> {
    upstream: Arc<U>,
    config: RelayConfig,
}

impl<U: ChatUpstream + 'static> Relay<U> {
    /// Create a relay over an upstream
    pub fn new(upstream: U, config: RelayConfig) -> Self {
        Self::from_arc(Arc::new(upstream), config)
    }

    /// Create a relay over a shared upstream
    pub fn from_arc(upstream: Arc<U>, config: RelayConfig) -> Self {
        Self { upstream, config }
    }

    /// The upstream turns are relayed to
    #[must_use]
    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Relay tuning
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Open a turn and start pumping its body
    ///
    /// # Errors
    ///
    /// - [`RelayError::UpstreamRejected`] for a non-success status
    /// - [`RelayError::EmptyUpstreamBody`] when the upstream sent no body
    /// - [`RelayError::Transport`] when the upstream could not be reached
    pub async fn open(&self, request: &TurnRequest) -> Result<RelayStream, RelayError> {
        let response = self.upstream.open_turn(request).await.map_err(|e| {
            tracing::error!(
                session_id = %request.session_id,
                turn_id = %request.turn_id,
                upstream = self.upstream.name(),
                error = %e,
                "Upstream unreachable"
            );
            e
        })?;

        if !response.is_success() {
            let body = match response.body {
                Some(body) => read_rejection_body(body).await,
                None => String::new(),
            };
            tracing::warn!(
                session_id = %request.session_id,
                turn_id = %request.turn_id,
                status = response.status,
                "Upstream rejected turn"
            );
            return Err(RelayError::UpstreamRejected {
                status: response.status,
                body,
            });
        }

        let Some(body) = response.body else {
            tracing::warn!(
                session_id = %request.session_id,
                turn_id = %request.turn_id,
                "Upstream response has no body"
            );
            return Err(RelayError::EmptyUpstreamBody);
        };

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        tokio::spawn(pump(
            body,
            tx,
            self.config.max_chunk_bytes.max(1),
            request.session_id.clone(),
            request.turn_id.clone(),
        ));

        tracing::info!(
            session_id = %request.session_id,
            turn_id = %request.turn_id,
            content_type = response.content_type.as_deref().unwrap_or("-"),
            "Relaying upstream turn"
        );

        Ok(RelayStream {
            content_type: response.content_type,
            inner: ReceiverStream::new(rx),
        })
    }
}

/// Downstream end of a relayed body
///
/// Yields the upstream bytes in order. A mid-stream upstream failure arrives
/// as a final `Err` item.
pub struct RelayStream {
    content_type: Option<String>,
    inner: ReceiverStream<Result<Bytes, RelayError>>,
}

impl RelayStream {
    /// `Content-Type` reported by the upstream
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Body shape implied by the content type
    #[must_use]
    pub fn shape(&self) -> ResponseShape {
        ResponseShape::from_content_type(self.content_type())
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for RelayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStream")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

async fn pump(
    mut body: ByteStream,
    tx: mpsc::Sender<Result<Bytes, RelayError>>,
    max_chunk_bytes: usize,
    session_id: SessionId,
    turn_id: TurnId,
) {
    let mut relayed: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = tx.closed() => {
                tracing::warn!(
                    session_id = %session_id,
                    turn_id = %turn_id,
                    bytes = relayed,
                    "Downstream closed, cancelling upstream read"
                );
                return;
            }
            next = body.next() => next,
        };

        match next {
            Some(Ok(mut chunk)) => {
                while !chunk.is_empty() {
                    let piece = chunk.split_to(chunk.len().min(max_chunk_bytes));
                    relayed += piece.len() as u64;
                    if tx.send(Ok(piece)).await.is_err() {
                        tracing::warn!(
                            session_id = %session_id,
                            turn_id = %turn_id,
                            bytes = relayed,
                            "Downstream closed mid-chunk"
                        );
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                tracing::error!(
                    session_id = %session_id,
                    turn_id = %turn_id,
                    bytes = relayed,
                    error = %e,
                    "Upstream failed mid-stream"
                );
                let _ = tx.send(Err(e)).await;
                return;
            }
            None => {
                tracing::debug!(
                    session_id = %session_id,
                    turn_id = %turn_id,
                    bytes = relayed,
                    "Upstream body complete"
                );
                return;
            }
        }
    }
}

async fn read_rejection_body(mut body: ByteStream) -> String {
    let mut text = Vec::new();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(chunk) => {
                let room = MAX_REJECTION_BODY_BYTES - text.len();
                text.extend_from_slice(&chunk[..chunk.len().min(room)]);
                if text.len() >= MAX_REJECTION_BODY_BYTES {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Rejection body read failed");
                break;
            }
        }
    }
    String::from_utf8_lossy(&text).into_owned()
}
