//! Event-Stream Pipeline
//!
//! The downstream half of a turn: bytes in, observer updates out.
//!
//! ```text
//!   bytes ──► FrameSplitter ──► EventDecoder ──► TurnReducer ──► TurnUpdate
//!            (partial lines)    (ChatEvent)      (TurnPhase)
//! ```
//!
//! Each stage is synchronous and owned by the task driving one turn, so frames
//! are decoded and delivered strictly in arrival order.

mod decoder;
mod reducer;
mod splitter;

pub use decoder::{
    decode_fallback_body, decode_frame, decode_payload, DecoderStats, EventDecoder,
    ResponseShape, FALLBACK_PLACEHOLDER, MAX_SINGLE_OBJECT_BYTES,
};
pub use reducer::{
    error_message, ConversationTurnState, TurnPhase, TurnReducer, APOLOGY_MESSAGE,
};
pub use splitter::{FrameSplitter, RawFrame, FRAME_PREFIX};
