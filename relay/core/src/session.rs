//! Session History
//!
//! Finalized turns per session, and the registry that serializes appends.
//!
//! # Design Philosophy
//!
//! A [`ConversationHistory`] only ever grows by whole, finalized turns. The
//! in-flight turn lives in its reducer until it is terminal; only then is it
//! appended here and handed to the [`HistoryStore`]. Reloading from the store
//! replaces the history wholesale.
//!
//! Turns of different sessions never contend. Turns of the same session
//! append one at a time behind that session's async mutex.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::backend::HistoryMessage;
use crate::error::RelayError;
use crate::messages::{now_ms, CompletedTurn, SessionId, TurnId, TurnResolution};
use crate::persistence::HistoryStore;

/// One finished exchange: user input plus assistant output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedTurn {
    /// Turn ID
    pub turn_id: TurnId,
    /// What the user sent
    pub user_input: String,
    /// Final answer, apology, or error text
    pub assistant_output: String,
    /// Thinking steps, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thoughts: Vec<String>,
    /// How the turn ended
    pub resolution: TurnResolution,
    /// When the turn was finalized (Unix timestamp ms)
    pub timestamp: u64,
}

impl FinalizedTurn {
    /// Build from the terminal pair of a turn
    pub fn from_completed(user_input: impl Into<String>, completed: CompletedTurn) -> Self {
        Self {
            turn_id: completed.turn_id,
            user_input: user_input.into(),
            assistant_output: completed.final_content,
            thoughts: completed.thoughts,
            resolution: completed.resolution,
            timestamp: now_ms(),
        }
    }

    /// Messages this turn contributes to the upstream context
    ///
    /// Turns that were not answered contribute nothing: their output is a
    /// locally synthesized apology or error text.
    #[must_use]
    pub fn context_messages(&self) -> Vec<HistoryMessage> {
        if !self.resolution.is_answered() {
            return Vec::new();
        }
        vec![
            HistoryMessage::user(self.user_input.clone()),
            HistoryMessage::assistant(self.assistant_output.clone()),
        ]
    }
}

/// Ordered finalized turns of one session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    /// Session this history belongs to
    pub session_id: SessionId,
    /// Turns, oldest first
    turns: Vec<FinalizedTurn>,
}

impl ConversationHistory {
    /// Empty history
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            turns: Vec::new(),
        }
    }

    /// Append a finalized turn
    pub fn append(&mut self, turn: FinalizedTurn) {
        self.turns.push(turn);
    }

    /// Replace every turn, e.g. after reloading from the store
    pub fn replace_all(&mut self, turns: Vec<FinalizedTurn>) {
        self.turns = turns;
    }

    /// All turns
    #[must_use]
    pub fn turns(&self) -> &[FinalizedTurn] {
        &self.turns
    }

    /// Number of turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether there are no turns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Most recent turn
    #[must_use]
    pub fn last(&self) -> Option<&FinalizedTurn> {
        self.turns.last()
    }

    /// Upstream context from the last `max_turns` answered turns (0 = all)
    #[must_use]
    pub fn prior_messages(&self, max_turns: usize) -> Vec<HistoryMessage> {
        let answered: Vec<&FinalizedTurn> = self
            .turns
            .iter()
            .filter(|turn| turn.resolution.is_answered())
            .collect();
        let start = if max_turns == 0 {
            0
        } else {
            answered.len().saturating_sub(max_turns)
        };
        answered[start..]
            .iter()
            .flat_map(|turn| turn.context_messages())
            .collect()
    }
}

// =============================================================================
// Session Registry
// =============================================================================

struct SessionSlot {
    history: ConversationHistory,
    loaded: bool,
}

/// Per-session histories backed by a [`HistoryStore`]
///
/// A session's history is loaded from the store the first time it is used.
pub struct SessionRegistry {
    store: Arc<dyn HistoryStore>,
    sessions: DashMap<SessionId, Arc<Mutex<SessionSlot>>>,
}

impl SessionRegistry {
    /// Create a registry over a store
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            store,
            sessions: DashMap::new(),
        }
    }

    /// The backing store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    /// Sessions touched since startup
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Current history of a session
    pub async fn snapshot(&self, session_id: &SessionId) -> Result<ConversationHistory, RelayError> {
        let slot = self.slot(session_id);
        let mut slot = slot.lock().await;
        self.ensure_loaded(&mut slot).await?;
        Ok(slot.history.clone())
    }

    /// Upstream context for the next turn of a session
    pub async fn prior_messages(
        &self,
        session_id: &SessionId,
        max_turns: usize,
    ) -> Result<Vec<HistoryMessage>, RelayError> {
        let slot = self.slot(session_id);
        let mut slot = slot.lock().await;
        self.ensure_loaded(&mut slot).await?;
        Ok(slot.history.prior_messages(max_turns))
    }

    /// Append a finalized turn and persist it
    ///
    /// The in-memory history keeps the turn even when the store fails; the
    /// store error is returned.
    pub async fn append(
        &self,
        session_id: &SessionId,
        turn: FinalizedTurn,
    ) -> Result<(), RelayError> {
        let slot = self.slot(session_id);
        let mut slot = slot.lock().await;
        self.ensure_loaded(&mut slot).await?;

        let stored = self.store.append_turn(session_id, &turn).await;
        slot.history.append(turn);

        stored.map_err(|e| RelayError::Persistence(format!("{e:#}")))
    }

    /// Reload a session from the store, replacing the cached history
    pub async fn reload(&self, session_id: &SessionId) -> Result<ConversationHistory, RelayError> {
        let slot = self.slot(session_id);
        let mut slot = slot.lock().await;
        slot.loaded = false;
        self.ensure_loaded(&mut slot).await?;
        Ok(slot.history.clone())
    }

    fn slot(&self, session_id: &SessionId) -> Arc<Mutex<SessionSlot>> {
        let entry = self.sessions.entry(session_id.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(SessionSlot {
                history: ConversationHistory::new(session_id.clone()),
                loaded: false,
            }))
        });
        Arc::clone(entry.value())
    }

    async fn ensure_loaded(&self, slot: &mut SessionSlot) -> Result<(), RelayError> {
        if slot.loaded {
            return Ok(());
        }
        let session_id = slot.history.session_id.clone();
        let turns = self
            .store
            .load_turns(&session_id)
            .await
            .map_err(|e| RelayError::Persistence(format!("{e:#}")))?;

        tracing::debug!(
            session_id = %session_id,
            turns = turns.len(),
            "Loaded session history"
        );
        slot.history.replace_all(turns);
        slot.loaded = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryHistoryStore;
    use pretty_assertions::assert_eq;

    fn turn(user: &str, output: &str, resolution: TurnResolution) -> FinalizedTurn {
        FinalizedTurn::from_completed(
            user,
            CompletedTurn {
                turn_id: TurnId::new(),
                thoughts: vec!["step".to_string()],
                final_content: output.to_string(),
                resolution,
            },
        )
    }

    #[test]
    fn test_prior_messages_skip_unanswered() {
        let mut history = ConversationHistory::new(SessionId::from("s"));
        history.append(turn("q1", "a1", TurnResolution::Answered));
        history.append(turn("q2", "sorry", TurnResolution::FallbackTimeout));
        history.append(turn("q3", "a3", TurnResolution::Answered));

        assert_eq!(
            history.prior_messages(0),
            vec![
                HistoryMessage::user("q1"),
                HistoryMessage::assistant("a1"),
                HistoryMessage::user("q3"),
                HistoryMessage::assistant("a3"),
            ]
        );
        assert_eq!(
            history.prior_messages(1),
            vec![HistoryMessage::user("q3"), HistoryMessage::assistant("a3")]
        );
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_replace_all() {
        let mut history = ConversationHistory::new(SessionId::from("s"));
        history.append(turn("old", "x", TurnResolution::Answered));
        history.replace_all(vec![turn("new", "y", TurnResolution::Answered)]);
        assert_eq!(history.len(), 1);
        assert_eq!(history.last().unwrap().user_input, "new");
    }

    #[tokio::test]
    async fn test_registry_loads_lazily() {
        let store = Arc::new(MemoryHistoryStore::new());
        let session = SessionId::from("s1");
        store
            .append_turn(&session, &turn("stored", "answer", TurnResolution::Answered))
            .await
            .unwrap();

        let registry = SessionRegistry::new(store);
        assert_eq!(registry.session_count(), 0);

        let history = registry.snapshot(&session).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn test_registry_append_persists() {
        let store = Arc::new(MemoryHistoryStore::new());
        let registry = SessionRegistry::new(store.clone());
        let session = SessionId::from("s1");

        registry
            .append(&session, turn("q", "a", TurnResolution::Answered))
            .await
            .unwrap();

        assert_eq!(store.load_turns(&session).await.unwrap().len(), 1);
        assert_eq!(registry.snapshot(&session).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reload_replaces_cache() {
        let store = Arc::new(MemoryHistoryStore::new());
        let registry = SessionRegistry::new(store.clone());
        let session = SessionId::from("s1");

        assert!(registry.snapshot(&session).await.unwrap().is_empty());

        store
            .append_turn(&session, &turn("external", "a", TurnResolution::Answered))
            .await
            .unwrap();
        assert!(registry.snapshot(&session).await.unwrap().is_empty());

        let reloaded = registry.reload(&session).await.unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_serialize() {
        let registry = Arc::new(SessionRegistry::new(Arc::new(MemoryHistoryStore::new())));
        let session = SessionId::from("busy");

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .append(&session, turn(&format!("q{i}"), "a", TurnResolution::Answered))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let history = registry.snapshot(&session).await.unwrap();
        assert_eq!(history.len(), 16);
        assert_eq!(registry.store().load_turns(&session).await.unwrap().len(), 16);
    }
}
