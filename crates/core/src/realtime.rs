//! Wire format of the realtime model connection (OpenAI Realtime API).
//!
//! Only the events the bridge reacts to are modelled. Unknown server events
//! decode to [`ModelEvent::Unrecognized`] so new event types never break a call.

use serde::{Deserialize, Serialize};

/// Audio codec spoken on both sides of the bridge. Telephony media streams are
/// G.711 µ-law at 8 kHz, which the model accepts natively.
pub const PASSTHROUGH_AUDIO_FORMAT: &str = "audio/pcmu";

/// Commands sent to the model.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ModelCommand {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    /// Append caller audio to the model's input buffer.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    /// Abort the response currently being generated.
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

/// Events received from the model.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ModelEvent {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    /// The model's VAD detected the caller starting to talk.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    /// A chunk of generated audio, base64 in the passthrough codec.
    #[serde(rename = "response.output_audio.delta", alias = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.output_audio.done", alias = "response.audio.done")]
    AudioDone,
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "error")]
    Error { error: ModelError },
    #[serde(other)]
    Unrecognized,
}

/// Error details reported by the model. Not fatal for the call.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// The `session` object of a `session.update` command.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
    pub output_modalities: Vec<String>,
    pub audio: AudioConfig,
    pub instructions: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioConfig {
    pub input: AudioInput,
    pub output: AudioOutput,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioInput {
    pub format: AudioFormat,
    pub turn_detection: TurnDetection,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioOutput {
    pub format: AudioFormat,
    pub voice: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Turn detection mode. Semantic VAD decides end-of-turn from what the caller
/// said rather than from a fixed silence timeout.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    SemanticVad,
}

impl SessionConfig {
    /// A voice-only session speaking the passthrough codec in both directions.
    pub fn telephony(
        model: impl Into<String>,
        voice: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        let format = AudioFormat {
            kind: PASSTHROUGH_AUDIO_FORMAT.to_string(),
        };
        Self {
            kind: "realtime".to_string(),
            model: model.into(),
            output_modalities: vec!["audio".to_string()],
            audio: AudioConfig {
                input: AudioInput {
                    format: format.clone(),
                    turn_detection: TurnDetection::SemanticVad,
                },
                output: AudioOutput {
                    format,
                    voice: voice.into(),
                },
            },
            instructions: instructions.into(),
        }
    }
}

impl ModelCommand {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ModelEvent {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
