//! Barge-in state machine for model playback.
//!
//! The machine is pure: [`BargeIn::step`] looks at one model event and returns
//! what the caller must do plus the state to enter afterwards. The outbound
//! pump performs the directive and only then calls [`BargeIn::enter`], so the
//! cancel/clear commands of an interruption are always issued before the
//! machine reports `Idle` again.

use crate::realtime::ModelEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Playback {
    /// No model audio is being played to the caller.
    #[default]
    Idle,
    /// Model audio has been forwarded since the last interruption or completion.
    Responding,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Nothing,
    /// Forward one chunk of generated audio to the caller.
    Forward { stream_id: String, payload: String },
    /// Generated audio arrived before the call has a stream id.
    DropFrame,
    /// Cancel the model's response, then clear the caller's playback buffer.
    Interrupt { stream_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub directive: Directive,
    pub next: Playback,
}

#[derive(Debug, Default)]
pub struct BargeIn {
    state: Playback,
}

impl BargeIn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Playback {
        self.state
    }

    pub fn is_responding(&self) -> bool {
        self.state == Playback::Responding
    }

    pub fn enter(&mut self, next: Playback) {
        self.state = next;
    }

    /// Computes the transition for `event`. `stream_id` is the call's stream
    /// identifier if the telephony side has started the stream.
    pub fn step(&self, event: ModelEvent, stream_id: Option<&str>) -> Transition {
        use Directive::*;
        use Playback::*;

        let (directive, next) = match (self.state, event) {
            (_, ModelEvent::AudioDelta { delta }) => match stream_id {
                None => (DropFrame, self.state),
                // An empty chunk still means the model is speaking.
                Some(_) if delta.is_empty() => (Nothing, Responding),
                Some(stream_id) => (
                    Forward {
                        stream_id: stream_id.to_string(),
                        payload: delta,
                    },
                    Responding,
                ),
            },
            (Responding, ModelEvent::SpeechStarted) => match stream_id {
                Some(stream_id) => (
                    Interrupt {
                        stream_id: stream_id.to_string(),
                    },
                    Idle,
                ),
                None => (Nothing, Idle),
            },
            (Idle, ModelEvent::SpeechStarted) => (Nothing, Idle),
            (_, ModelEvent::AudioDone | ModelEvent::ResponseDone) => (Nothing, Idle),
            (state, _) => (Nothing, state),
        };

        Transition { directive, next }
    }
}
