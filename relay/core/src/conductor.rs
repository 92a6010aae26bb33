//! Turn Conductor
//!
//! Drives one conversation turn end to end and exposes it to an observer.
//!
//! # Design Philosophy
//!
//! Each submitted turn gets its own task that owns the whole pipeline:
//!
//! ```text
//!   submit_turn ──► Relay::open ──► spawn TurnDriver::run ────────┐
//!                                                                │
//!   RelayStream ──► EventDecoder ──► TurnReducer ──► mpsc ──► TurnHandle
//!                                        │
//!                                        └── terminal ──► SessionRegistry
//! ```
//!
//! Nothing is shared between turns except the session registry, so turns of
//! different sessions run fully in parallel. The observer sees the updates in
//! arrival order and exactly one `Completed` update per turn.
//!
//! Rejections that happen before any byte is relayed (invalid input, an
//! upstream error status, a missing body) are returned from
//! [`TurnConductor::submit_turn`] directly and never reach an observer.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::backend::{ChatUpstream, TurnRequest};
use crate::error::RelayError;
use crate::messages::{CompletedTurn, SessionId, TurnId, TurnUpdate};
use crate::persistence::HistoryStore;
use crate::relay::{Relay, RelayStream};
use crate::session::{ConversationHistory, FinalizedTurn, SessionRegistry};
use crate::stream::{EventDecoder, TurnReducer};

/// Turn lifecycle tuning
#[derive(Clone, Debug)]
pub struct TurnConfig {
    /// Wait after the stream closes without an answer before apologizing
    pub fallback_grace: Duration,
    /// Maximum user message length in bytes
    pub max_input_length: usize,
    /// Updates buffered for a slow observer
    pub observer_capacity: usize,
    /// Answered turns sent upstream as context (0 = all)
    pub max_context_turns: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            fallback_grace: Duration::from_millis(1000),
            max_input_length: 32768,
            observer_capacity: 64,
            max_context_turns: 0,
        }
    }
}

/// Owns the relay and session histories, and runs turns
pub struct TurnConductor<U: ChatUpstream> {
    relay: Arc<Relay<U>>,
    sessions: Arc<SessionRegistry>,
    config: TurnConfig,
}

impl<U: ChatUpstream + 'static> TurnConductor<U> {
    /// Create a conductor
    pub fn new(relay: Relay<U>, store: Arc<dyn HistoryStore>, config: TurnConfig) -> Self {
        Self {
            relay: Arc::new(relay),
            sessions: Arc::new(SessionRegistry::new(store)),
            config,
        }
    }

    /// The relay turns are opened through
    #[must_use]
    pub fn relay(&self) -> &Relay<U> {
        &self.relay
    }

    /// Turn tuning
    #[must_use]
    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// Submit a user message as a new turn
    ///
    /// # Errors
    ///
    /// Fails without starting the turn for invalid input, an unreachable or
    /// rejecting upstream, or a response without a body.
    pub async fn submit_turn(
        &self,
        session_id: &SessionId,
        input: &str,
    ) -> Result<TurnHandle, RelayError> {
        self.submit_authenticated_turn(session_id, input, None).await
    }

    /// Submit a turn forwarding a caller-supplied bearer token
    ///
    /// # Errors
    ///
    /// See [`submit_turn`](Self::submit_turn).
    pub async fn submit_authenticated_turn(
        &self,
        session_id: &SessionId,
        input: &str,
        auth_token: Option<String>,
    ) -> Result<TurnHandle, RelayError> {
        self.validate_input(input)?;

        let prior = self
            .sessions
            .prior_messages(session_id, self.config.max_context_turns)
            .await?;

        let mut request = TurnRequest::new(session_id.clone(), input).with_history(prior);
        if let Some(token) = auth_token {
            request = request.with_auth_token(token);
        }

        tracing::info!(
            session_id = %session_id,
            turn_id = %request.turn_id,
            prior_messages = request.prior_history.len(),
            "Submitting turn"
        );

        let stream = self.relay.open(&request).await?;

        let (tx, rx) = mpsc::channel(self.config.observer_capacity.max(1));
        let driver = TurnDriver {
            session_id: session_id.clone(),
            turn_id: request.turn_id.clone(),
            user_input: request.new_message,
            sessions: Arc::clone(&self.sessions),
            fallback_grace: self.config.fallback_grace,
            updates: tx,
        };
        let task = tokio::spawn(driver.run(stream));

        Ok(TurnHandle {
            turn_id: request.turn_id,
            session_id: session_id.clone(),
            updates: rx,
            task,
        })
    }

    /// Finalized turns of a session
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Persistence`] if the session cannot be loaded.
    pub async fn history(&self, session_id: &SessionId) -> Result<ConversationHistory, RelayError> {
        self.sessions.snapshot(session_id).await
    }

    /// Reload a session from the store, replacing the cached history
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Persistence`] if the store cannot be read.
    pub async fn reload_history(
        &self,
        session_id: &SessionId,
    ) -> Result<ConversationHistory, RelayError> {
        self.sessions.reload(session_id).await
    }

    fn validate_input(&self, input: &str) -> Result<(), RelayError> {
        if input.trim().is_empty() {
            return Err(RelayError::InvalidInput("message is empty".to_string()));
        }
        if input.len() > self.config.max_input_length {
            return Err(RelayError::InvalidInput(format!(
                "message is {} bytes, limit is {}",
                input.len(),
                self.config.max_input_length
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Turn Task
// =============================================================================

struct TurnDriver {
    session_id: SessionId,
    turn_id: TurnId,
    user_input: String,
    sessions: Arc<SessionRegistry>,
    fallback_grace: Duration,
    updates: mpsc::Sender<TurnUpdate>,
}

impl TurnDriver {
    async fn run(self, stream: RelayStream) -> Option<CompletedTurn> {
        let mut reducer = TurnReducer::new(self.turn_id.clone());
        reducer.begin();

        if self.pump(stream, &mut reducer).await.is_err() {
            if reducer.completed().is_some() {
                tracing::debug!(
                    session_id = %self.session_id,
                    turn_id = %self.turn_id,
                    "Observer left after the terminal update, releasing upstream"
                );
            } else {
                tracing::warn!(
                    session_id = %self.session_id,
                    turn_id = %self.turn_id,
                    phase = ?reducer.phase(),
                    "Observer dropped, turn cancelled"
                );
            }
        }

        reducer.completed()
    }

    /// Run the stream to its end, including the fallback grace delay
    ///
    /// A terminal turn keeps draining the upstream until it closes, so late
    /// events are consumed and ignored. Returns `Err` when the observer went
    /// away first.
    async fn pump(&self, mut stream: RelayStream, reducer: &mut TurnReducer) -> Result<(), ()> {
        let mut decoder = EventDecoder::new(stream.shape());

        loop {
            let item = tokio::select! {
                biased;
                () = self.updates.closed() => return Err(()),
                item = stream.next() => item,
            };
            let Some(item) = item else { break };

            match item {
                Ok(chunk) => {
                    for event in decoder.push(&chunk) {
                        tracing::debug!(turn_id = %self.turn_id, kind = event.kind(), "Decoded event");
                        self.deliver(reducer.apply(event)).await?;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %self.session_id,
                        turn_id = %self.turn_id,
                        error = %e,
                        "Turn stream failed"
                    );
                    self.deliver(reducer.fail(&e)).await?;
                    break;
                }
            }
        }
        drop(stream);

        for event in decoder.finish() {
            self.deliver(reducer.apply(event)).await?;
        }

        let stats = decoder.stats();
        tracing::debug!(
            turn_id = %self.turn_id,
            bytes = stats.bytes,
            frames = stats.frames_decoded,
            skipped = stats.frames_skipped,
            "Turn stream closed"
        );

        if reducer.close_stream() {
            tracing::warn!(
                session_id = %self.session_id,
                turn_id = %self.turn_id,
                grace_ms = u64::try_from(self.fallback_grace.as_millis()).unwrap_or(u64::MAX),
                "Stream closed without an answer, waiting before fallback"
            );
            tokio::select! {
                () = self.updates.closed() => return Err(()),
                () = tokio::time::sleep(self.fallback_grace) => {}
            }
            self.deliver(reducer.resolve_fallback()).await?;
        }

        Ok(())
    }

    /// Send an update to the observer
    ///
    /// The terminal update is persisted before it is sent, so an observer
    /// holding the `Completed` update can rely on the session history.
    async fn deliver(&self, update: Option<TurnUpdate>) -> Result<(), ()> {
        let Some(update) = update else {
            return Ok(());
        };
        if let TurnUpdate::Completed(completed) = &update {
            self.persist(completed).await;
        }
        self.updates.send(update).await.map_err(|_| ())
    }

    async fn persist(&self, completed: &CompletedTurn) {
        let turn = FinalizedTurn::from_completed(self.user_input.clone(), completed.clone());
        match self.sessions.append(&self.session_id, turn).await {
            Ok(()) => tracing::info!(
                session_id = %self.session_id,
                turn_id = %self.turn_id,
                resolution = ?completed.resolution,
                thoughts = completed.thoughts.len(),
                "Turn finalized"
            ),
            Err(e) => tracing::error!(
                session_id = %self.session_id,
                turn_id = %self.turn_id,
                error = %e,
                "Failed to persist turn"
            ),
        }
    }
}

// =============================================================================
// Observer Handle
// =============================================================================

/// Observer end of a running turn
#[derive(Debug)]
pub struct TurnHandle {
    turn_id: TurnId,
    session_id: SessionId,
    updates: mpsc::Receiver<TurnUpdate>,
    task: JoinHandle<Option<CompletedTurn>>,
}

impl TurnHandle {
    /// Turn ID
    #[must_use]
    pub fn turn_id(&self) -> &TurnId {
        &self.turn_id
    }

    /// Session ID
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Next progressive update, `None` once the turn is over
    pub async fn next_update(&mut self) -> Option<TurnUpdate> {
        self.updates.recv().await
    }

    /// Wait for the terminal `{thoughts, final_content}` pair
    ///
    /// Returns as soon as the turn is terminal, even if the upstream keeps
    /// its connection open. By then the turn has been appended to the session
    /// history. Consuming the handle releases the upstream.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] if the turn task panicked or ended
    /// without a terminal state.
    pub async fn finish(mut self) -> Result<CompletedTurn, RelayError> {
        while let Some(update) = self.updates.recv().await {
            if let TurnUpdate::Completed(turn) = update {
                return Ok(turn);
            }
        }

        self.task
            .await
            .map_err(|e| RelayError::Transport(format!("turn task failed: {e}")))?
            .ok_or_else(|| RelayError::Transport("turn ended without a terminal state".to_string()))
    }

    /// The update sequence as a stream
    ///
    /// The stream ends once the upstream closes. Dropping it before the
    /// terminal update cancels the turn; dropping it afterwards only stops
    /// draining the upstream.
    #[must_use]
    pub fn into_updates(self) -> ReceiverStream<TurnUpdate> {
        ReceiverStream::new(self.updates)
    }
}
