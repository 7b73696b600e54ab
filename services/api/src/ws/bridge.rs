//! Runs one phone call end to end.

use super::{
    PumpExit, inbound,
    link::{Keepalive, Outgoing, TelephonyLink, WriterExit, run_writer},
    outbound::{self, OutboundQueues},
    provider::ModelConnector,
};
use crate::error::{BridgeError, LinkError, Side};
use futures_util::SinkExt;
use phonebridge_core::{
    realtime::{ModelCommand, SessionConfig},
    session::{CallIdentity, CallSession},
};
use tokio::{
    sync::mpsc,
    task::{JoinError, JoinHandle},
    time::{Duration, timeout},
};
use tracing::{debug, info, warn};

/// Per-call settings shared by every bridge.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Sent to the model once, right after connecting.
    pub session: SessionConfig,
    /// Commands that may wait in a link's outbound queue before senders block.
    pub queue_capacity: usize,
    /// How long a link gets to flush and close during teardown.
    pub close_grace: Duration,
    /// Pings sent on both links. `None` turns keepalive off.
    pub keepalive: Option<Keepalive>,
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The telephony side sent `stop`.
    CallStopped,
    /// A link closed, stopped answering pings, or its writer exited.
    LinkClosed(Side),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSummary {
    pub identity: Option<CallIdentity>,
    pub reason: EndReason,
}

type WriterResult = Result<Result<WriterExit, LinkError>, JoinError>;
type WriterHandle = JoinHandle<Result<WriterExit, LinkError>>;

/// Bridges a telephony link to a newly opened model link until the call ends.
///
/// The model link is opened and configured first; if either step fails the
/// telephony link is closed and the call ends with an error. Afterwards both
/// pumps run until one of them stops or a link writer finishes. A link whose
/// peer has gone away, by closing or by sending `stop`, is closed without
/// flushing; the other one is flushed first. Every task started for the
/// call has exited or been aborted when this returns.
pub async fn run_call(
    mut telephony: TelephonyLink,
    connector: &dyn ModelConnector,
    settings: &BridgeSettings,
) -> Result<CallSummary, BridgeError> {
    let mut model = match connector.connect().await {
        Ok(model) => model,
        Err(e) => {
            let _ = telephony.commands.close().await;
            return Err(BridgeError::Connect(e));
        }
    };
    let configure = ModelCommand::SessionUpdate {
        session: settings.session.clone(),
    };
    if let Err(e) = model.commands.send(Outgoing::Command(configure)).await {
        let _ = model.commands.close().await;
        let _ = telephony.commands.close().await;
        return Err(BridgeError::Configure(e));
    }
    debug!("Model session configuration sent");

    let (session, identity_slot, playback_flag) = CallSession::new();
    let caller = telephony.peer.clone();

    let (telephony_tx, telephony_rx) = mpsc::channel(settings.queue_capacity);
    let (model_tx, model_rx) = mpsc::channel(settings.queue_capacity);
    let mut telephony_writer: WriterHandle = tokio::spawn(run_writer(
        Side::Telephony,
        telephony.commands,
        telephony_rx,
        telephony.peer.subscribe(),
        settings.close_grace,
        settings.keepalive,
    ));
    let mut model_writer: WriterHandle = tokio::spawn(run_writer(
        Side::Model,
        model.commands,
        model_rx,
        model.peer.subscribe(),
        settings.close_grace,
        settings.keepalive,
    ));

    let mut inbound = Box::pin(inbound::run(
        telephony.events,
        identity_slot,
        model_tx.clone(),
    ));
    let mut outbound = Box::pin(outbound::run(
        model.events,
        session.clone(),
        playback_flag,
        OutboundQueues {
            telephony: telephony_tx,
            model: model_tx,
        },
    ));

    let mut telephony_done = None;
    let mut model_done = None;
    let reason = tokio::select! {
        exit = &mut inbound => end_reason(exit),
        exit = &mut outbound => end_reason(exit),
        result = &mut telephony_writer => {
            telephony_done = Some(result);
            EndReason::LinkClosed(Side::Telephony)
        }
        result = &mut model_writer => {
            model_done = Some(result);
            EndReason::LinkClosed(Side::Model)
        }
    };
    info!(?reason, "Call ending, tearing down links");

    if reason == EndReason::CallStopped {
        // The caller hung up; nothing still queued for them will be played.
        caller.end();
    }
    // Dropping the pumps drops every queue sender, which lets the writers
    // flush what is already queued and close their sockets.
    drop(inbound);
    drop(outbound);

    let telephony_result = match telephony_done {
        Some(result) => writer_outcome(Side::Telephony, result),
        None => settle(Side::Telephony, telephony_writer, settings.close_grace).await,
    };
    let model_result = match model_done {
        Some(result) => writer_outcome(Side::Model, result),
        None => settle(Side::Model, model_writer, settings.close_grace).await,
    };
    telephony_result?;
    model_result?;

    Ok(CallSummary {
        identity: session.identity(),
        reason,
    })
}

fn end_reason(exit: PumpExit) -> EndReason {
    match exit {
        PumpExit::CallStopped => EndReason::CallStopped,
        PumpExit::LinkGone(side) => EndReason::LinkClosed(side),
    }
}

/// Waits for a writer to finish on its own, aborting it after `grace`.
async fn settle(side: Side, mut writer: WriterHandle, grace: Duration) -> Result<(), BridgeError> {
    // The writer's own close step is bounded by `grace` too.
    match timeout(grace * 2, &mut writer).await {
        Ok(result) => writer_outcome(side, result),
        Err(_) => {
            warn!(%side, "Link writer did not finish in time, aborting");
            writer.abort();
            Ok(())
        }
    }
}

fn writer_outcome(side: Side, result: WriterResult) -> Result<(), BridgeError> {
    match result {
        Ok(Ok(exit)) => {
            debug!(%side, ?exit, "Link writer finished");
            Ok(())
        }
        Ok(Err(source)) => Err(BridgeError::Send { side, source }),
        Err(e) => Err(BridgeError::Task {
            side,
            message: e.to_string(),
        }),
    }
}
