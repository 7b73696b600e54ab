//! Model → telephony pump and barge-in handling.

use super::PumpExit;
use crate::error::Side;
use futures_util::{Stream, StreamExt};
use phonebridge_core::{
    barge_in::{BargeIn, Directive},
    realtime::{ModelCommand, ModelEvent},
    session::{CallSession, PlaybackFlag},
    telephony::TelephonyCommand,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Queues for the two links the outbound pump writes to.
pub struct OutboundQueues {
    pub telephony: mpsc::Sender<TelephonyCommand>,
    pub model: mpsc::Sender<ModelCommand>,
}

/// Relays generated audio to the caller and interrupts the model when the
/// caller starts talking over it.
///
/// On an interruption the `response.cancel` and `clear` commands are both
/// queued before the playback state returns to idle, and before the next
/// model event is looked at. A delta that the model had already sent before
/// seeing the cancel is forwarded like any other.
pub async fn run<S>(
    mut events: S,
    session: CallSession,
    playback: PlaybackFlag,
    queues: OutboundQueues,
) -> PumpExit
where
    S: Stream<Item = ModelEvent> + Unpin,
{
    let mut machine = BargeIn::new();
    let mut forwarded: u64 = 0;
    let mut interruptions: u64 = 0;

    while let Some(event) = events.next().await {
        match &event {
            ModelEvent::SessionCreated => info!("Model session created"),
            ModelEvent::SessionUpdated => info!("Model session configured"),
            ModelEvent::SpeechStopped => debug!("Caller stopped talking"),
            ModelEvent::Error { error } => {
                warn!(code = ?error.code, message = %error.message, "Model reported an error")
            }
            _ => {}
        }

        let stream_id = session.stream_id();
        let transition = machine.step(event, stream_id.as_deref());
        match transition.directive {
            Directive::Nothing => {}
            Directive::DropFrame => debug!("Dropping model audio, stream not started"),
            Directive::Forward { stream_id, payload } => {
                let media = TelephonyCommand::media(stream_id, payload);
                if queues.telephony.send(media).await.is_err() {
                    return PumpExit::LinkGone(Side::Telephony);
                }
                forwarded += 1;
            }
            Directive::Interrupt { stream_id } => {
                info!(%stream_id, forwarded, "Caller barged in, cancelling response");
                if queues.model.send(ModelCommand::ResponseCancel).await.is_err() {
                    return PumpExit::LinkGone(Side::Model);
                }
                if queues
                    .telephony
                    .send(TelephonyCommand::clear(stream_id))
                    .await
                    .is_err()
                {
                    return PumpExit::LinkGone(Side::Telephony);
                }
                interruptions += 1;
            }
        }
        machine.enter(transition.next);
        playback.set(machine.is_responding());
    }

    info!(forwarded, interruptions, "Model link closed");
    PumpExit::LinkGone(Side::Model)
}
