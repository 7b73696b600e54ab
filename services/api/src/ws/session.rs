//! Accepts telephony media-stream connections and hands each one to a bridge.

use super::{bridge::run_call, link::TelephonyLink};
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{
            CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code,
            rejection::WebSocketUpgradeRejection,
        },
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures_util::SinkExt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Axum handler for the media stream path. Every accepted socket is one call.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_call(socket, state))
}

#[instrument(name = "call", skip_all, fields(conn_id))]
async fn handle_call(socket: WebSocket, state: Arc<AppState>) {
    let conn_id: u32 = rand::random();
    tracing::Span::current().record("conn_id", conn_id);
    info!("Telephony media stream connected");

    let telephony = TelephonyLink::from_socket(socket);
    match run_call(telephony, state.connector.as_ref(), &state.settings).await {
        Ok(summary) => info!(
            stream_id = ?summary.identity.as_ref().map(|identity| &identity.stream_id),
            call_id = ?summary.identity.as_ref().and_then(|identity| identity.call_id.as_ref()),
            reason = ?summary.reason,
            "Call finished"
        ),
        Err(e) => error!(error = %e, "Call terminated with error"),
    }
}

/// Fallback for every other path.
///
/// WebSocket upgrades are accepted only to be closed right away with a
/// policy-violation close code; plain HTTP requests get a 404.
pub async fn reject_handler(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => {
            warn!(path = %uri.path(), "Rejecting media stream on unknown path");
            let reason = format!("Use {}", state.config.media_path);
            ws.on_upgrade(move |socket| reject_socket(socket, reason))
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn reject_socket(mut socket: WebSocket, reason: String) {
    let close = Message::Close(Some(CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    }));
    if let Err(e) = socket.send(close).await {
        warn!(error = %e, "Failed to send policy close frame");
    }
}
