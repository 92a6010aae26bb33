//! Upstream Chat Service Integration
//!
//! Abstracted access to the chat service turns are relayed to, through a
//! common trait interface.
//!
//! # Available Upstreams
//!
//! - **HTTP**: posts turns with `reqwest` and streams the body back
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{ChatUpstream, HttpUpstream, TurnRequest, UpstreamConfig};
//!
//! let upstream = HttpUpstream::new(UpstreamConfig::default())?;
//! let request = TurnRequest::new("session-1".into(), "Hello!");
//! let response = upstream.open_turn(&request).await?;
//! ```

mod http;
mod traits;

pub use http::HttpUpstream;
pub use traits::{
    ByteStream, ChatUpstream, HistoryMessage, TurnRequest, UpstreamConfig, UpstreamResponse,
};
