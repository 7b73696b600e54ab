//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the resources every
//! call needs: the loaded configuration, the model connector, and the
//! per-call bridge settings.

use crate::{config::Config, ws::bridge::BridgeSettings, ws::provider::ModelConnector};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
/// Nothing in here is per-call; each call builds its own session.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connector: Arc<dyn ModelConnector>,
    pub settings: Arc<BridgeSettings>,
}

impl AppState {
    pub fn new(config: Config, connector: Arc<dyn ModelConnector>) -> Self {
        let settings = config.bridge_settings();
        Self {
            config: Arc::new(config),
            connector,
            settings: Arc::new(settings),
        }
    }
}
