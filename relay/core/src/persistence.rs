//! History Persistence
//!
//! Where finalized turns go once a turn is terminal.
//!
//! - [`MemoryHistoryStore`]: process-local, for tests and stateless relays
//! - [`JsonlHistoryStore`]: one JSON-lines file per session under a directory

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;

use crate::messages::SessionId;
use crate::session::FinalizedTurn;

/// Persistence collaborator for session histories
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load every stored turn of a session, oldest first
    ///
    /// A session with no stored turns yields an empty list.
    async fn load_turns(&self, session_id: &SessionId) -> anyhow::Result<Vec<FinalizedTurn>>;

    /// Append one finalized turn
    async fn append_turn(&self, session_id: &SessionId, turn: &FinalizedTurn)
        -> anyhow::Result<()>;
}

/// In-memory history store
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    sessions: DashMap<SessionId, Vec<FinalizedTurn>>,
}

impl MemoryHistoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load_turns(&self, session_id: &SessionId) -> anyhow::Result<Vec<FinalizedTurn>> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|turns| turns.clone())
            .unwrap_or_default())
    }

    async fn append_turn(
        &self,
        session_id: &SessionId,
        turn: &FinalizedTurn,
    ) -> anyhow::Result<()> {
        self.sessions
            .entry(session_id.clone())
            .or_default()
            .push(turn.clone());
        Ok(())
    }
}

/// JSON-lines history store
///
/// Each session is a file `<dir>/<session>.jsonl` with one turn per line.
#[derive(Clone, Debug)]
pub struct JsonlHistoryStore {
    dir: PathBuf,
}

impl JsonlHistoryStore {
    /// Create a store rooted at `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding a session's turns
    ///
    /// `[A-Za-z0-9-]` is kept as is; every other UTF-8 byte becomes `_XX`.
    /// The mapping is reversible, so distinct session IDs never share a file,
    /// and no session ID can escape the directory.
    #[must_use]
    pub fn session_path(&self, session_id: &SessionId) -> PathBuf {
        let mut name = String::with_capacity(session_id.0.len());
        for c in session_id.0.chars() {
            if c.is_ascii_alphanumeric() || c == '-' {
                name.push(c);
            } else {
                let mut utf8 = [0u8; 4];
                for byte in c.encode_utf8(&mut utf8).bytes() {
                    name.push('_');
                    name.push_str(&hex::encode_upper([byte]));
                }
            }
        }
        if name.is_empty() {
            name.push('_');
        }
        self.dir.join(format!("{name}.jsonl"))
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn load_turns(&self, session_id: &SessionId) -> anyhow::Result<Vec<FinalizedTurn>> {
        let path = self.session_path(session_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };

        let mut turns = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FinalizedTurn>(line) {
                Ok(turn) => turns.push(turn),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    line = number + 1,
                    error = %e,
                    "Skipping unreadable history line"
                ),
            }
        }
        Ok(turns)
    }

    async fn append_turn(
        &self,
        session_id: &SessionId,
        turn: &FinalizedTurn,
    ) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let path = self.session_path(session_id);
        let mut line = serde_json::to_string(turn)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
