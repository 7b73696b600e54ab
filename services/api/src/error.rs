//! Error types for links and calls.

use std::fmt;

/// Which side of the bridge a link connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Telephony,
    Model,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Telephony => f.write_str("telephony"),
            Side::Model => f.write_str("model"),
        }
    }
}

/// A failure on a single WebSocket link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("telephony socket error: {0}")]
    Telephony(#[from] axum::Error),
    #[error("model socket error: {0}")]
    Model(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid model link request: {0}")]
    Request(String),
    #[error("link closed")]
    Closed,
}

/// A failure that ends a call.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to open model link: {0}")]
    Connect(#[source] LinkError),
    #[error("failed to configure model session: {0}")]
    Configure(#[source] LinkError),
    #[error("failed to send on {side} link: {source}")]
    Send {
        side: Side,
        #[source]
        source: LinkError,
    },
    #[error("{side} link writer task failed: {message}")]
    Task { side: Side, message: String },
}
