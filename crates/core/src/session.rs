//! Per-call state shared by the two pumps of a bridge.
//!
//! Each field has exactly one writer. The writer halves are handed out once
//! by [`CallSession::new`]; every other party only gets read-only views. The
//! values travel over `tokio::sync::watch` channels, so a write made by one
//! pump is visible to the other without locks.

use tokio::sync::watch;

/// Identifiers assigned by the telephony side when the media stream starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallIdentity {
    pub stream_id: String,
    pub call_id: Option<String>,
}

/// Read-only view of a call's state, owned by the bridge coordinator.
#[derive(Debug, Clone)]
pub struct CallSession {
    identity: watch::Receiver<Option<CallIdentity>>,
    responding: watch::Receiver<bool>,
}

/// Writer half for the call identity. Owned by the inbound pump.
#[derive(Debug)]
pub struct IdentitySlot(watch::Sender<Option<CallIdentity>>);

/// Writer half for the "responding" flag. Owned by the outbound pump.
#[derive(Debug)]
pub struct PlaybackFlag(watch::Sender<bool>);

impl CallSession {
    /// Creates a session with no identifiers and nothing playing.
    pub fn new() -> (Self, IdentitySlot, PlaybackFlag) {
        let (identity_tx, identity_rx) = watch::channel(None);
        let (responding_tx, responding_rx) = watch::channel(false);
        (
            Self {
                identity: identity_rx,
                responding: responding_rx,
            },
            IdentitySlot(identity_tx),
            PlaybackFlag(responding_tx),
        )
    }

    pub fn identity(&self) -> Option<CallIdentity> {
        self.identity.borrow().clone()
    }

    pub fn stream_id(&self) -> Option<String> {
        self.identity
            .borrow()
            .as_ref()
            .map(|identity| identity.stream_id.clone())
    }

    pub fn is_responding(&self) -> bool {
        *self.responding.borrow()
    }
}

impl IdentitySlot {
    pub fn assign(&self, identity: CallIdentity) {
        self.0.send_replace(Some(identity));
    }
}

impl PlaybackFlag {
    pub fn set(&self, responding: bool) {
        self.0.send_if_modified(|current| {
            let changed = *current != responding;
            *current = responding;
            changed
        });
    }
}
