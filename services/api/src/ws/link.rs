//! Typed WebSocket links.
//!
//! A [`Link`] is one WebSocket connection split into a stream of decoded
//! events and a sink of commands. Frames are decoded exactly once, here; the
//! pumps only ever see protocol enums. Malformed frames are logged and
//! dropped, and a close frame or read error ends the event stream.
//!
//! Each link also carries a [`PeerMonitor`]: the reader records when it last
//! heard from the peer and when the peer ended, and the link's writer uses
//! that to stop sending to a peer that is gone and to time out keepalive
//! pings.

use crate::error::{LinkError, Side};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    Sink, SinkExt, Stream, StreamExt, future,
    stream::{self, BoxStream},
};
use phonebridge_core::{
    realtime::{ModelCommand, ModelEvent},
    telephony::{TelephonyCommand, TelephonyEvent},
};
use std::{pin::Pin, sync::Arc};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::{Duration, Instant, sleep_until, timeout},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

/// A frame a link writer puts on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing<T> {
    Command(T),
    /// Keepalive ping. In-memory links drop it.
    Ping,
}

pub type CommandSink<Out> = Pin<Box<dyn Sink<Outgoing<Out>, Error = LinkError> + Send>>;

/// What is known about the far end of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    /// When the last frame of any kind was read from the peer.
    pub last_heard: Instant,
    /// The peer closed its side, or the call ended on its behalf.
    pub ended: bool,
}

/// Read-side status of one link, shared by its reader, its writer and the
/// call coordinator.
#[derive(Clone)]
pub struct PeerMonitor(Arc<watch::Sender<PeerState>>);

impl Default for PeerMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PeerState {
            last_heard: Instant::now(),
            ended: false,
        });
        Self(Arc::new(tx))
    }

    /// Records that a frame arrived. Writers only read this when a ping
    /// deadline passes, so nobody is woken up.
    pub fn heard(&self) {
        let now = Instant::now();
        self.0.send_if_modified(|state| {
            state.last_heard = now;
            false
        });
    }

    /// Marks the peer as gone. The link's writer stops sending.
    pub fn end(&self) {
        self.0
            .send_if_modified(|state| !std::mem::replace(&mut state.ended, true));
    }

    pub fn state(&self) -> PeerState {
        *self.0.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PeerState> {
        self.0.subscribe()
    }
}

/// One WebSocket connection, decoded into events and encoded from commands.
pub struct Link<In, Out> {
    pub events: BoxStream<'static, In>,
    pub commands: CommandSink<Out>,
    pub peer: PeerMonitor,
}

pub type TelephonyLink = Link<TelephonyEvent, TelephonyCommand>;
pub type ModelLink = Link<ModelEvent, ModelCommand>;

impl<In, Out> Link<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Builds a link out of an already typed event stream and command sink.
    ///
    /// Every event counts as hearing from the peer and the end of the stream
    /// ends the peer. Keepalive pings are dropped before they reach the sink.
    pub fn new<S, K>(events: S, commands: K) -> Self
    where
        S: Stream<Item = In> + Send + 'static,
        K: Sink<Out, Error = LinkError> + Send + 'static,
    {
        let peer = PeerMonitor::new();
        let commands = commands.with_flat_map(|outgoing: Outgoing<Out>| {
            stream::iter(match outgoing {
                Outgoing::Command(command) => Some(Ok(command)),
                Outgoing::Ping => None,
            })
        });
        Self {
            events: decoded(events.boxed(), Frame::Event, peer.clone()).boxed(),
            commands: Box::pin(commands),
            peer,
        }
    }
}

/// What to do with one raw frame read off a socket.
#[derive(Debug, PartialEq)]
pub(crate) enum Frame<T> {
    Event(T),
    Skip,
    Closed,
}

fn decode_text<T>(
    side: Side,
    text: &str,
    decode: fn(&str) -> Result<T, serde_json::Error>,
) -> Frame<T> {
    match decode(text) {
        Ok(event) => Frame::Event(event),
        Err(e) => {
            warn!(%side, error = %e, "Dropping malformed frame");
            Frame::Skip
        }
    }
}

pub(crate) fn telephony_frame(msg: Result<Message, axum::Error>) -> Frame<TelephonyEvent> {
    match msg {
        Ok(Message::Text(text)) => {
            decode_text(Side::Telephony, text.as_str(), TelephonyEvent::decode)
        }
        Ok(Message::Close(frame)) => {
            info!(?frame, "Telephony side sent close frame");
            Frame::Closed
        }
        Ok(Message::Binary(_)) => {
            debug!("Ignoring binary frame from telephony side");
            Frame::Skip
        }
        Ok(Message::Ping(_) | Message::Pong(_)) => Frame::Skip,
        Err(e) => {
            warn!(error = %e, "Telephony link read failed");
            Frame::Closed
        }
    }
}

pub(crate) fn model_frame(
    msg: Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
) -> Frame<ModelEvent> {
    match msg {
        Ok(WsMessage::Text(text)) => decode_text(Side::Model, text.as_str(), ModelEvent::decode),
        Ok(WsMessage::Close(frame)) => {
            info!(?frame, "Model side sent close frame");
            Frame::Closed
        }
        Ok(WsMessage::Binary(_)) => {
            debug!("Ignoring binary frame from model side");
            Frame::Skip
        }
        Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => Frame::Skip,
        Err(e) => {
            warn!(error = %e, "Model link read failed");
            Frame::Closed
        }
    }
}

/// Turns a raw socket stream into an event stream that ends on close.
///
/// Every raw frame, pongs included, is reported to `peer` as a sign of life.
fn decoded<S, R, T>(
    raw: S,
    classify: fn(R) -> Frame<T>,
    peer: PeerMonitor,
) -> impl Stream<Item = T> + Send + 'static
where
    S: Stream<Item = R> + Send + Unpin + 'static,
    R: Send + 'static,
    T: Send + 'static,
{
    stream::unfold((raw, peer), move |(mut raw, peer)| async move {
        loop {
            let Some(msg) = raw.next().await else {
                peer.end();
                return None;
            };
            peer.heard();
            match classify(msg) {
                Frame::Event(event) => return Some((event, (raw, peer))),
                Frame::Skip => continue,
                Frame::Closed => {
                    peer.end();
                    return None;
                }
            }
        }
    })
}

fn telephony_message(outgoing: Outgoing<TelephonyCommand>) -> Result<Message, LinkError> {
    match outgoing {
        Outgoing::Command(command) => Ok(Message::Text(command.encode()?.into())),
        Outgoing::Ping => Ok(Message::Ping(Default::default())),
    }
}

fn model_message(outgoing: Outgoing<ModelCommand>) -> Result<WsMessage, LinkError> {
    match outgoing {
        Outgoing::Command(command) => Ok(WsMessage::Text(command.encode()?.into())),
        Outgoing::Ping => Ok(WsMessage::Ping(Default::default())),
    }
}

impl TelephonyLink {
    /// Wraps an accepted telephony socket.
    pub fn from_socket(socket: WebSocket) -> Self {
        let peer = PeerMonitor::new();
        let (tx, rx) = socket.split();
        let commands = tx.with(|outgoing| future::ready(telephony_message(outgoing)));
        Link {
            events: decoded(rx, telephony_frame, peer.clone()).boxed(),
            commands: Box::pin(commands),
            peer,
        }
    }
}

impl ModelLink {
    /// Wraps a connected model socket.
    pub fn from_stream(ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        let peer = PeerMonitor::new();
        let (tx, rx) = ws_stream.split();
        let commands = tx.with(|outgoing| future::ready(model_message(outgoing)));
        Link {
            events: decoded(rx, model_frame, peer.clone()).boxed(),
            commands: Box::pin(commands),
            peer,
        }
    }
}

/// Ping timing for a link writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub interval: Duration,
    /// How long the peer has to answer a ping.
    pub timeout: Duration,
}

/// How a writer finished when no send failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// Every queue sender went away; the queue was flushed and the link closed.
    Drained,
    /// The peer ended first. Whatever was still queued was dropped.
    PeerEnded,
    /// Nothing was heard from the peer within the ping timeout.
    Unresponsive,
}

#[derive(Debug, PartialEq, Eq)]
enum Beat {
    Ping,
    Wait,
    Dead,
}

/// Keepalive bookkeeping for one writer.
#[derive(Debug)]
struct Pings {
    keepalive: Keepalive,
    next_ping: Instant,
    awaiting_since: Option<Instant>,
}

impl Pings {
    fn new(keepalive: Keepalive, now: Instant) -> Self {
        Self {
            keepalive,
            next_ping: now + keepalive.interval,
            awaiting_since: None,
        }
    }

    fn wake_at(&self) -> Instant {
        match self.awaiting_since {
            Some(sent) => sent + self.keepalive.timeout,
            None => self.next_ping,
        }
    }

    /// Decides what to do at `now`, given when the peer was last heard from.
    fn beat(&mut self, now: Instant, last_heard: Instant) -> Beat {
        if let Some(sent) = self.awaiting_since {
            if last_heard < sent {
                return if now >= sent + self.keepalive.timeout {
                    Beat::Dead
                } else {
                    Beat::Wait
                };
            }
            self.awaiting_since = None;
        }
        if now < self.next_ping {
            return Beat::Wait;
        }
        self.awaiting_since = Some(now);
        self.next_ping = now + self.keepalive.interval;
        Beat::Ping
    }
}

enum Delivery {
    Sent,
    Unresponsive,
}

/// Sends one frame. While the send is blocked the ping clock keeps running,
/// and a ping that falls due is counted as sent, so a socket that stops
/// draining is given up on like a silent one.
async fn deliver<Out>(
    sink: &mut CommandSink<Out>,
    frame: Outgoing<Out>,
    pings: &mut Option<Pings>,
    peer: &watch::Receiver<PeerState>,
) -> Result<Delivery, LinkError> {
    let mut send = sink.send(frame);
    loop {
        let wake_at = pings.as_ref().map_or_else(Instant::now, Pings::wake_at);
        tokio::select! {
            result = &mut send => return result.map(|()| Delivery::Sent),
            _ = sleep_until(wake_at), if pings.is_some() => {
                let last_heard = peer.borrow().last_heard;
                if let Some(pings) = pings.as_mut() {
                    if pings.beat(Instant::now(), last_heard) == Beat::Dead {
                        return Ok(Delivery::Unresponsive);
                    }
                }
            }
        }
    }
}

/// Resolves once the peer has ended. Returns `false` if nothing can report
/// on the peer anymore.
async fn peer_ended(peer: &mut watch::Receiver<PeerState>) -> bool {
    peer.wait_for(|state| state.ended).await.is_ok()
}

async fn close_quietly<Out>(side: Side, sink: &mut CommandSink<Out>, grace: Duration) {
    match timeout(grace, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(%side, error = %e, "Link close failed"),
        Err(_) => debug!(%side, "Link close timed out"),
    }
}

/// Drains a link's outbound queue into its socket.
///
/// The writer stops as soon as the peer has ended, dropping anything still
/// queued, because the far side is no longer reading. A send that fails
/// because the peer went away first is not an error either. Any other send
/// failure is returned. With `keepalive` set the writer pings the peer and
/// gives up once a ping goes unanswered for the configured timeout.
pub(crate) async fn run_writer<Out>(
    side: Side,
    mut sink: CommandSink<Out>,
    mut queue: mpsc::Receiver<Out>,
    mut peer: watch::Receiver<PeerState>,
    close_grace: Duration,
    keepalive: Option<Keepalive>,
) -> Result<WriterExit, LinkError> {
    let mut pings = keepalive.map(|keepalive| Pings::new(keepalive, Instant::now()));
    let mut watching_peer = true;
    let mut sent: u64 = 0;

    loop {
        let wake_at = pings.as_ref().map_or_else(Instant::now, Pings::wake_at);
        let frame = tokio::select! {
            biased;

            ended = peer_ended(&mut peer), if watching_peer => {
                if ended {
                    let dropped = queue.len();
                    debug!(%side, sent, dropped, "Peer ended, link writer stopping");
                    drop(queue);
                    close_quietly(side, &mut sink, close_grace).await;
                    return Ok(WriterExit::PeerEnded);
                }
                watching_peer = false;
                continue;
            }
            _ = sleep_until(wake_at), if pings.is_some() => {
                let last_heard = peer.borrow().last_heard;
                match pings.as_mut().map(|pings| pings.beat(Instant::now(), last_heard)) {
                    Some(Beat::Ping) => Outgoing::Ping,
                    Some(Beat::Dead) => {
                        warn!(%side, "Peer stopped answering keepalive pings");
                        return Ok(WriterExit::Unresponsive);
                    }
                    Some(Beat::Wait) | None => continue,
                }
            }
            command = queue.recv() => match command {
                Some(command) => Outgoing::Command(command),
                None => break,
            },
        };

        let is_command = matches!(frame, Outgoing::Command(_));
        match deliver(&mut sink, frame, &mut pings, &peer).await {
            Ok(Delivery::Sent) => {
                if is_command {
                    sent += 1;
                }
            }
            Ok(Delivery::Unresponsive) => {
                warn!(%side, sent, "Peer stopped reading and answering keepalive pings");
                return Ok(WriterExit::Unresponsive);
            }
            Err(e) => {
                // The peer closing first makes sends fail; that ends the link cleanly.
                if let Ok(true) = timeout(close_grace, peer_ended(&mut peer)).await {
                    debug!(%side, sent, error = %e, "Send failed after peer ended");
                    return Ok(WriterExit::PeerEnded);
                }
                return Err(e);
            }
        }
    }

    debug!(%side, sent, "Outbound queue closed, closing link");
    close_quietly(side, &mut sink, close_grace).await;
    Ok(WriterExit::Drained)
}
