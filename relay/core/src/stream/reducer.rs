//! Turn-State Reducer
//!
//! Folds the decoded event sequence of one turn into a
//! [`ConversationTurnState`] and emits the observer updates.
//!
//! # State Machine
//!
//! ```text
//!                   begin()
//!   ┌──────┐  ─────────────────►  ┌───────────┐
//!   │ Idle │                      │ Streaming │ ◄──┐ Thinking (append, notify)
//!   └──────┘                      └─────┬─────┘ ───┘
//!                                       │
//!          ┌────────────────────────────┼─────────────────────────┐
//!          │ FinalAnswer /              │ close_stream()          │ fail()
//!          │ first RawContent           │                         │
//!          ▼                            ▼                         ▼
//!   ┌───────────┐              ┌─────────────────┐          ┌─────────┐
//!   │ Finalized │              │ FallbackTimeout │          │ Errored │
//!   └───────────┘              └────────┬────────┘          └─────────┘
//!                                       │ resolve_fallback()
//!                                       ▼
//!                                 apology update
//! ```
//!
//! Terminal phases ignore every further input, so exactly one terminal
//! update is ever produced per reducer. `FallbackTimeout` is entered when the
//! stream closes; its terminal update follows once the grace delay has run
//! and [`TurnReducer::resolve_fallback`] is called.

use crate::error::RelayError;
use crate::events::ChatEvent;
use crate::messages::{CompletedTurn, TurnId, TurnResolution, TurnUpdate};

/// Final content synthesized when the stream ends without an answer
pub const APOLOGY_MESSAGE: &str =
    "I apologize, but I didn't receive a complete response. Please try again.";

/// Final content for a turn that failed mid-stream
#[must_use]
pub fn error_message(error: &RelayError) -> String {
    format!(
        "Sorry, I encountered an error while processing your request: {error}. Please try again."
    )
}

/// Lifecycle phase of a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    /// Created, not yet submitted
    Idle,
    /// Submitted, events are being applied
    Streaming,
    /// A final answer was accepted
    Finalized,
    /// The stream closed without an answer; the apology follows the grace delay
    FallbackTimeout,
    /// The stream failed
    Errored,
}

impl TurnPhase {
    /// Whether the phase accepts no further input
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::FallbackTimeout | Self::Errored)
    }
}

/// Accumulated state of one turn
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationTurnState {
    /// Turn this state belongs to
    pub turn_id: TurnId,
    /// Thinking steps in arrival order
    pub thoughts: Vec<String>,
    /// Set exactly once
    pub finalized: bool,
    /// Empty until finalized
    pub final_content: String,
}

impl ConversationTurnState {
    /// Fresh state for a new turn
    #[must_use]
    pub fn new(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            thoughts: Vec::new(),
            finalized: false,
            final_content: String::new(),
        }
    }
}

/// Single-writer reducer for one turn
#[derive(Debug)]
pub struct TurnReducer {
    state: ConversationTurnState,
    phase: TurnPhase,
    resolution: Option<TurnResolution>,
    ignored_events: u64,
}

impl TurnReducer {
    /// Create a reducer in the `Idle` phase
    #[must_use]
    pub fn new(turn_id: TurnId) -> Self {
        Self {
            state: ConversationTurnState::new(turn_id),
            phase: TurnPhase::Idle,
            resolution: None,
            ignored_events: 0,
        }
    }

    /// Mark the turn as submitted
    pub fn begin(&mut self) {
        if self.phase == TurnPhase::Idle {
            self.phase = TurnPhase::Streaming;
        }
    }

    /// Apply one decoded event
    ///
    /// Returns the update to deliver to the observer, if any.
    pub fn apply(&mut self, event: ChatEvent) -> Option<TurnUpdate> {
        if self.phase != TurnPhase::Streaming {
            self.ignored_events += 1;
            tracing::debug!(
                turn_id = %self.state.turn_id,
                phase = ?self.phase,
                kind = event.kind(),
                "Ignoring event outside streaming phase"
            );
            return None;
        }

        match event {
            ChatEvent::Thinking { content } => {
                let index = self.state.thoughts.len();
                self.state.thoughts.push(content.clone());
                Some(TurnUpdate::Thought {
                    turn_id: self.state.turn_id.clone(),
                    content,
                    index,
                })
            }
            ChatEvent::FinalAnswer { content } | ChatEvent::RawContent { content } => Some(
                self.finalize(TurnPhase::Finalized, TurnResolution::Answered, content),
            ),
            ChatEvent::Unrecognized => None,
        }
    }

    /// The stream failed while streaming
    ///
    /// Thoughts received so far are kept.
    pub fn fail(&mut self, error: &RelayError) -> Option<TurnUpdate> {
        if self.phase != TurnPhase::Streaming {
            return None;
        }
        Some(self.finalize(
            TurnPhase::Errored,
            TurnResolution::Errored,
            error_message(error),
        ))
    }

    /// The stream closed
    ///
    /// Returns true when no answer was accepted. The turn is then in
    /// [`TurnPhase::FallbackTimeout`] and the caller must wait the grace
    /// delay, then call [`resolve_fallback`](Self::resolve_fallback).
    pub fn close_stream(&mut self) -> bool {
        if self.phase != TurnPhase::Streaming {
            return false;
        }
        self.phase = TurnPhase::FallbackTimeout;
        true
    }

    /// Synthesize the apology after the grace delay
    pub fn resolve_fallback(&mut self) -> Option<TurnUpdate> {
        if self.phase != TurnPhase::FallbackTimeout || self.resolution.is_some() {
            return None;
        }
        Some(self.finalize(
            TurnPhase::FallbackTimeout,
            TurnResolution::FallbackTimeout,
            APOLOGY_MESSAGE.to_string(),
        ))
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Accumulated state
    #[must_use]
    pub fn state(&self) -> &ConversationTurnState {
        &self.state
    }

    /// Number of events dropped because the turn was not streaming
    #[must_use]
    pub fn ignored_events(&self) -> u64 {
        self.ignored_events
    }

    /// The finalized pair, once terminal
    #[must_use]
    pub fn completed(&self) -> Option<CompletedTurn> {
        let resolution = self.resolution?;
        Some(CompletedTurn {
            turn_id: self.state.turn_id.clone(),
            thoughts: self.state.thoughts.clone(),
            final_content: self.state.final_content.clone(),
            resolution,
        })
    }

    fn finalize(
        &mut self,
        phase: TurnPhase,
        resolution: TurnResolution,
        content: String,
    ) -> TurnUpdate {
        self.phase = phase;
        self.resolution = Some(resolution);
        self.state.finalized = true;
        self.state.final_content = content;

        TurnUpdate::Completed(CompletedTurn {
            turn_id: self.state.turn_id.clone(),
            thoughts: self.state.thoughts.clone(),
            final_content: self.state.final_content.clone(),
            resolution,
        })
    }
}
