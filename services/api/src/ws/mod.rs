//! Call Bridging over WebSockets
//!
//! This module contains everything that runs for a single phone call:
//!
//! - `session`: Axum handlers that accept the telephony socket or reject it.
//! - `bridge`: The coordinator that owns a call from model connect to teardown.
//! - `inbound` / `outbound`: The two pumps moving frames between the links.
//! - `link`: Typed wrappers that decode and encode frames at the socket edge.
//! - `provider`: Connections to the realtime speech model.

pub mod bridge;
pub mod inbound;
pub mod link;
pub mod outbound;
pub mod provider;
pub mod session;

pub use session::{media_stream_handler, reject_handler};

use crate::error::Side;

/// How a pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The telephony side sent `stop`.
    CallStopped,
    /// The pump's source link closed, or a queue it writes to was closed.
    LinkGone(Side),
}
