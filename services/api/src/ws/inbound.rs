//! Telephony → model pump.

use super::PumpExit;
use crate::error::Side;
use futures_util::{Stream, StreamExt};
use phonebridge_core::{
    realtime::ModelCommand,
    session::{CallIdentity, IdentitySlot},
    telephony::TelephonyEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Relays caller audio to the model until the call stops or a link goes away.
///
/// Audio is queued for the model link without waiting for any acknowledgment.
/// The queue is bounded, so a slow model link holds this pump back rather than
/// buffering without limit.
pub async fn run<S>(
    mut events: S,
    identity: IdentitySlot,
    model_tx: mpsc::Sender<ModelCommand>,
) -> PumpExit
where
    S: Stream<Item = TelephonyEvent> + Unpin,
{
    let mut frames: u64 = 0;
    while let Some(event) = events.next().await {
        match event {
            TelephonyEvent::Start { start } => {
                info!(
                    stream_id = %start.stream_sid,
                    call_id = ?start.call_sid,
                    "Media stream started"
                );
                identity.assign(CallIdentity {
                    stream_id: start.stream_sid,
                    call_id: start.call_sid,
                });
            }
            TelephonyEvent::Media { media } => {
                let append = ModelCommand::InputAudioBufferAppend {
                    audio: media.payload,
                };
                if model_tx.send(append).await.is_err() {
                    debug!(frames, "Model queue closed");
                    return PumpExit::LinkGone(Side::Model);
                }
                frames += 1;
            }
            TelephonyEvent::Stop => {
                info!(frames, "Media stream stopped");
                return PumpExit::CallStopped;
            }
            TelephonyEvent::Connected | TelephonyEvent::Mark | TelephonyEvent::Dtmf => {
                debug!(?event, "Telephony lifecycle event");
            }
            TelephonyEvent::Unrecognized => debug!("Ignoring unrecognized telephony event"),
        }
    }
    info!(frames, "Telephony link closed");
    PumpExit::LinkGone(Side::Telephony)
}
