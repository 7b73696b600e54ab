//! Axum Router Configuration
//!
//! The service exposes exactly one WebSocket endpoint, the media stream path.
//! Everything else falls through to a handler that turns WebSocket clients
//! away with a policy-violation close.

use crate::{
    state::AppState,
    ws::{media_stream_handler, reject_handler},
};

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let media_path = app_state.config.media_path.clone();
    Router::new()
        .route(&media_path, get(media_stream_handler))
        .fallback(reject_handler)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}
