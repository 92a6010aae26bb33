//! Relay Core - Streaming Chat Relay and Turn-State Machine
//!
//! This crate relays conversation turns to an upstream chat service and turns
//! the streamed answer into a typed, observable turn state. It has no HTTP
//! server and no terminal code; the daemon crate puts a surface on top.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Observers                                 │
//! │   ┌───────────┐   ┌──────────────┐   ┌────────────────────────┐  │
//! │   │ HTTP proxy│   │  CLI (ask)   │   │  tests / automation    │  │
//! │   └─────┬─────┘   └──────┬───────┘   └───────────┬────────────┘  │
//! │         │ raw bytes      │ TurnUpdate            │               │
//! └─────────┼────────────────┼───────────────────────┼───────────────┘
//!           │                │                       │
//! ┌─────────┼────────────────┼───────────────────────┼───────────────┐
//! │         │          TurnConductor ◄───────────────┘               │
//! │         │     ┌──────────┴─────────────────────────────┐         │
//! │         │     │ EventDecoder ─► TurnReducer ─► mpsc    │         │
//! │         │     └──────────▲─────────────────────────────┘         │
//! │         │                │ RelayStream                           │
//! │         └──────────► Relay ──► ChatUpstream (reqwest)            │
//! │                                                                  │
//! │   SessionRegistry ──► HistoryStore (memory / JSON lines)         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Relay`]: opens an upstream turn and pipes its bytes
//! - [`EventDecoder`]: bytes to [`ChatEvent`]s, for both response shapes
//! - [`TurnReducer`]: the per-turn state machine
//! - [`TurnConductor`]: runs whole turns and hands out [`TurnHandle`]s
//! - [`HistoryStore`]: persistence of finalized turns
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_core::{
//!     backend::{HttpUpstream, UpstreamConfig},
//!     MemoryHistoryStore, Relay, RelayConfig, SessionId, TurnConductor, TurnConfig, TurnUpdate,
//! };
//!
//! let upstream = HttpUpstream::new(UpstreamConfig::default())?;
//! let relay = Relay::new(upstream, RelayConfig::default());
//! let conductor = TurnConductor::new(relay, Arc::new(MemoryHistoryStore::new()), TurnConfig::default());
//!
//! let mut turn = conductor.submit_turn(&SessionId::new(), "What is a stack?").await?;
//! while let Some(update) = turn.next_update().await {
//!     match update {
//!         TurnUpdate::Thought { content, .. } => println!("thinking: {content}"),
//!         TurnUpdate::Completed(done) => println!("{}", done.final_content),
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: upstream chat service abstraction and the HTTP client
//! - [`relay`]: the byte pipe
//! - [`stream`]: frame splitter, decoder, and turn reducer
//! - [`conductor`]: turn orchestration and the observer handle
//! - [`session`]: conversation history and the session registry
//! - [`persistence`]: history stores
//! - [`config`]: TOML, environment, and CLI configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod conductor;
pub mod config;
pub mod error;
pub mod events;
pub mod messages;
pub mod persistence;
pub mod relay;
pub mod session;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types at crate root
pub use backend::{ChatUpstream, HistoryMessage, HttpUpstream, TurnRequest, UpstreamConfig};
pub use conductor::{TurnConductor, TurnConfig, TurnHandle};
pub use config::{
    default_config_path, load_config, load_config_from_path, ChatRelayConfig, ConfigError,
    ConfigOverrides, ConfigSource,
};
pub use error::RelayError;
pub use events::ChatEvent;
pub use messages::{CompletedTurn, MessageRole, SessionId, TurnId, TurnResolution, TurnUpdate};
pub use persistence::{HistoryStore, JsonlHistoryStore, MemoryHistoryStore};
pub use relay::{Relay, RelayConfig, RelayStream};
pub use session::{ConversationHistory, FinalizedTurn, SessionRegistry};
pub use stream::{
    ConversationTurnState, EventDecoder, ResponseShape, TurnPhase, TurnReducer, APOLOGY_MESSAGE,
};
