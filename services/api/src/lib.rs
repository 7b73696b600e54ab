//! Phonebridge API Library Crate
//!
//! This library contains the web service that answers telephony media streams
//! with a realtime speech model: configuration, application state, routing,
//! and the per-call WebSocket bridge. The `api` binary is a thin wrapper
//! around this library.

pub mod config;
pub mod error;
pub mod router;
pub mod state;
pub mod ws;
