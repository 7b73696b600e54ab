//! Wire format of the telephony media stream (Twilio Media Streams).
//!
//! Every frame is a JSON object discriminated by its `event` field. Only the
//! handful of fields the bridge acts on are modelled; everything else is
//! ignored on decode.

use serde::{Deserialize, Serialize};

/// Events received from the telephony endpoint.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    /// The WebSocket was accepted by the telephony side. Sent before `start`.
    Connected,
    /// The call's media stream started.
    Start { start: StreamStart },
    /// One chunk of caller audio.
    Media { media: MediaPayload },
    /// A playback marker we never place, echoed back by the endpoint.
    Mark,
    /// A keypad digit pressed by the caller.
    Dtmf,
    /// The call ended. Terminal.
    Stop,
    /// Anything this bridge does not know about.
    #[serde(other)]
    Unrecognized,
}

/// Identifiers carried by the `start` event.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StreamStart {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid", default)]
    pub call_sid: Option<String>,
}

/// A base64 audio payload, relayed verbatim in either direction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub payload: String,
}

/// Commands sent to the telephony endpoint.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyCommand {
    /// Queue audio for playback to the caller.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// Discard any audio queued for playback on the caller's side.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl TelephonyEvent {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl TelephonyCommand {
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Media {
            stream_sid: stream_sid.into(),
            media: MediaPayload {
                payload: payload.into(),
            },
        }
    }

    pub fn clear(stream_sid: impl Into<String>) -> Self {
        Self::Clear {
            stream_sid: stream_sid.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
