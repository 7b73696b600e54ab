//! Protocol types and call state for bridging a telephony media stream to a
//! realtime speech model.
//!
//! This crate does no I/O. The service crate owns the sockets and drives the
//! state defined here.

pub mod barge_in;
pub mod realtime;
pub mod session;
pub mod telephony;
