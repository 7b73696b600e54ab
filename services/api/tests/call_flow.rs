use async_trait::async_trait;
use futures::{
    SinkExt, StreamExt,
    channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded},
};
use phonebridge_api::{
    error::{BridgeError, LinkError, Side},
    ws::{
        bridge::{BridgeSettings, CallSummary, EndReason, run_call},
        link::{Keepalive, Link, ModelLink},
        provider::{ModelConnector, openai::OpenAIRealtime},
    },
};
use phonebridge_core::{
    realtime::{ModelCommand, ModelEvent, SessionConfig},
    session::CallIdentity,
    telephony::{MediaPayload, StreamStart, TelephonyCommand, TelephonyEvent},
};
use secrecy::SecretString;
use std::sync::Mutex;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
    time::{Duration, sleep, timeout},
};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message as WsMessage};

struct FakeConnector {
    link: Mutex<Option<ModelLink>>,
}

#[async_trait]
impl ModelConnector for FakeConnector {
    async fn connect(&self) -> Result<ModelLink, LinkError> {
        self.link
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| LinkError::Request("connection refused".to_string()))
    }
}

/// A link backed by in-memory channels, plus the far ends of both directions.
fn fake_link<In, Out>() -> (Link<In, Out>, UnboundedSender<In>, UnboundedReceiver<Out>)
where
    In: Send + 'static,
    Out: Send + 'static,
{
    let (event_tx, event_rx) = unbounded();
    let (command_tx, command_rx) = unbounded();
    let link = Link::new(event_rx, command_tx.sink_map_err(|_| LinkError::Closed));
    (link, event_tx, command_rx)
}

fn settings() -> BridgeSettings {
    BridgeSettings {
        session: SessionConfig::telephony("gpt-realtime", "marin", "Be brief."),
        queue_capacity: 8,
        close_grace: Duration::from_millis(200),
        keepalive: None,
    }
}

fn spawn_call(
    telephony: Link<TelephonyEvent, TelephonyCommand>,
    model: Option<ModelLink>,
) -> JoinHandle<Result<CallSummary, BridgeError>> {
    let connector = FakeConnector {
        link: Mutex::new(model),
    };
    tokio::spawn(async move { run_call(telephony, &connector, &settings()).await })
}

async fn next<T>(rx: &mut UnboundedReceiver<T>) -> Option<T> {
    timeout(Duration::from_secs(2), rx.next())
        .await
        .expect("timed out waiting for a frame")
}

fn start(stream_sid: &str) -> TelephonyEvent {
    TelephonyEvent::Start {
        start: StreamStart {
            stream_sid: stream_sid.to_string(),
            call_sid: Some("CA1".to_string()),
        },
    }
}

fn media(payload: &str) -> TelephonyEvent {
    TelephonyEvent::Media {
        media: MediaPayload {
            payload: payload.to_string(),
        },
    }
}

fn delta(payload: &str) -> ModelEvent {
    ModelEvent::AudioDelta {
        delta: payload.to_string(),
    }
}

fn append(audio: &str) -> ModelCommand {
    ModelCommand::InputAudioBufferAppend {
        audio: audio.to_string(),
    }
}

async fn expect_session_update(to_model: &mut UnboundedReceiver<ModelCommand>) {
    match next(to_model).await {
        Some(ModelCommand::SessionUpdate { session }) => {
            assert_eq!(session, settings().session);
        }
        other => panic!("Expected session.update first, got {:?}", other),
    }
}

#[tokio::test]
async fn test_full_call_with_barge_in() {
    let (telephony, caller, mut to_caller) = fake_link();
    let (model, model_events, mut to_model) = fake_link();
    let call = spawn_call(telephony, Some(model));

    expect_session_update(&mut to_model).await;

    caller.unbounded_send(start("S1")).unwrap();
    caller.unbounded_send(media("AAA")).unwrap();
    assert_eq!(next(&mut to_model).await, Some(append("AAA")));

    model_events.unbounded_send(delta("BBB")).unwrap();
    assert_eq!(
        next(&mut to_caller).await,
        Some(TelephonyCommand::media("S1", "BBB"))
    );

    model_events
        .unbounded_send(ModelEvent::SpeechStarted)
        .unwrap();
    assert_eq!(next(&mut to_model).await, Some(ModelCommand::ResponseCancel));
    assert_eq!(next(&mut to_caller).await, Some(TelephonyCommand::clear("S1")));

    caller.unbounded_send(TelephonyEvent::Stop).unwrap();
    let summary = call.await.unwrap().unwrap();
    assert_eq!(summary.reason, EndReason::CallStopped);
    assert_eq!(
        summary.identity,
        Some(CallIdentity {
            stream_id: "S1".to_string(),
            call_id: Some("CA1".to_string()),
        })
    );

    // Both links are closed; nothing else was sent on either.
    assert_eq!(next(&mut to_caller).await, None);
    assert_eq!(next(&mut to_model).await, None);
    assert!(model_events.unbounded_send(delta("late")).is_err());
}

#[tokio::test]
async fn test_caller_audio_is_relayed_in_order() {
    let (telephony, caller, _to_caller) = fake_link();
    let (model, _model_events, mut to_model) = fake_link();
    let call = spawn_call(telephony, Some(model));

    expect_session_update(&mut to_model).await;

    let payloads: Vec<String> = (0..50).map(|i| format!("chunk-{i}")).collect();
    caller.unbounded_send(start("S1")).unwrap();
    for payload in &payloads {
        caller.unbounded_send(media(payload)).unwrap();
    }
    caller.unbounded_send(TelephonyEvent::Stop).unwrap();
    caller.unbounded_send(media("after-stop")).unwrap();

    assert_eq!(call.await.unwrap().unwrap().reason, EndReason::CallStopped);

    let mut relayed = Vec::new();
    while let Some(command) = next(&mut to_model).await {
        match command {
            ModelCommand::InputAudioBufferAppend { audio } => relayed.push(audio),
            other => panic!("Unexpected model command {:?}", other),
        }
    }
    assert_eq!(relayed, payloads);
}

#[tokio::test]
async fn test_model_close_ends_call() {
    let (telephony, caller, mut to_caller) = fake_link();
    let (model, model_events, mut to_model) = fake_link();
    let call = spawn_call(telephony, Some(model));

    expect_session_update(&mut to_model).await;
    caller.unbounded_send(start("S1")).unwrap();
    drop(model_events);

    let summary = call.await.unwrap().unwrap();
    assert_eq!(summary.reason, EndReason::LinkClosed(Side::Model));
    assert_eq!(next(&mut to_caller).await, None);
    assert!(caller.unbounded_send(media("AAA")).is_err());
}

#[tokio::test]
async fn test_telephony_close_ends_call() {
    let (telephony, caller, mut to_caller) = fake_link();
    let (model, _model_events, mut to_model) = fake_link();
    let call = spawn_call(telephony, Some(model));

    expect_session_update(&mut to_model).await;
    drop(caller);

    let summary = call.await.unwrap().unwrap();
    assert_eq!(summary.reason, EndReason::LinkClosed(Side::Telephony));
    assert_eq!(summary.identity, None);
    assert_eq!(next(&mut to_model).await, None);
    assert_eq!(next(&mut to_caller).await, None);
}

#[tokio::test]
async fn test_connect_failure_closes_telephony() {
    let (telephony, _caller, mut to_caller) = fake_link();
    let call = spawn_call(telephony, None);

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::Connect(LinkError::Request(_))));
    assert_eq!(next(&mut to_caller).await, None);
}

#[tokio::test]
async fn test_configure_failure_is_fatal() {
    let (telephony, _caller, mut to_caller) = fake_link();
    let (model, _model_events, to_model) = fake_link::<ModelEvent, ModelCommand>();
    drop(to_model);
    let call = spawn_call(telephony, Some(model));

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::Configure(LinkError::Closed)));
    assert_eq!(next(&mut to_caller).await, None);
}

#[tokio::test]
async fn test_telephony_send_failure_is_fatal() {
    let (telephony, caller, to_caller) = fake_link();
    let (model, model_events, mut to_model) = fake_link();
    let call = spawn_call(telephony, Some(model));

    expect_session_update(&mut to_model).await;
    caller.unbounded_send(start("S1")).unwrap();
    caller.unbounded_send(media("AAA")).unwrap();
    assert_eq!(next(&mut to_model).await, Some(append("AAA")));

    drop(to_caller);
    model_events.unbounded_send(delta("BBB")).unwrap();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Send {
            side: Side::Telephony,
            source: LinkError::Closed,
        }
    ));
    assert_eq!(next(&mut to_model).await, None);
}

/// Serves one model connection over a real socket on localhost and returns
/// a connector pointed at it.
async fn model_server<F, Fut>(serve: F) -> OpenAIRealtime
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        serve(ws).await;
    });
    OpenAIRealtime::new(
        &format!("ws://{addr}/v1/realtime"),
        "gpt-realtime",
        SecretString::from("sk-test".to_string()),
        1024,
    )
}

/// Streams caller audio every millisecond until the call stops reading.
fn stream_caller_audio(caller: UnboundedSender<TelephonyEvent>) -> JoinHandle<u32> {
    tokio::spawn(async move {
        caller.unbounded_send(start("S1")).unwrap();
        let mut sent = 0;
        while caller
            .unbounded_send(media(&format!("chunk-{sent}")))
            .is_ok()
        {
            sent += 1;
            sleep(Duration::from_millis(1)).await;
        }
        sent
    })
}

#[tokio::test]
async fn test_model_hangup_mid_stream_ends_call_cleanly() {
    for _ in 0..5 {
        let connector = model_server(|mut ws| async move {
            let mut frames = 0;
            while frames < 20 {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(_))) => frames += 1,
                    Some(Ok(_)) => {}
                    _ => return,
                }
            }
            ws.send(WsMessage::Close(None)).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;
        let (telephony, caller, _to_caller) = fake_link();
        let call =
            tokio::spawn(async move { run_call(telephony, &connector, &settings()).await });
        let streaming = stream_caller_audio(caller);

        let summary = timeout(Duration::from_secs(5), call)
            .await
            .expect("call did not end")
            .unwrap()
            .expect("a model hang-up is a normal end of the call");
        assert_eq!(summary.reason, EndReason::LinkClosed(Side::Model));
        assert!(streaming.await.unwrap() >= 19);
    }
}

#[tokio::test]
async fn test_silent_model_is_dropped_by_keepalive() {
    // Never reads again after the handshake, so pings go unanswered.
    let connector = model_server(|ws| async move {
        sleep(Duration::from_secs(10)).await;
        drop(ws);
    })
    .await;
    let (telephony, caller, _to_caller) = fake_link();
    let settings = BridgeSettings {
        keepalive: Some(Keepalive {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(100),
        }),
        ..settings()
    };
    let call = tokio::spawn(async move { run_call(telephony, &connector, &settings).await });
    let streaming = stream_caller_audio(caller);

    let summary = timeout(Duration::from_secs(3), call)
        .await
        .expect("a silent model kept the call open")
        .unwrap()
        .unwrap();
    assert_eq!(summary.reason, EndReason::LinkClosed(Side::Model));
    streaming.await.unwrap();
}

#[tokio::test]
async fn test_oversized_model_frame_ends_call() {
    let connector = model_server(|mut ws| async move {
        let _session_update = ws.next().await;
        let huge = format!(
            r#"{{"type":"response.output_audio.delta","delta":"{}"}}"#,
            "A".repeat(4096)
        );
        let _ = ws.send(WsMessage::Text(huge.into())).await;
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    let (telephony, caller, mut to_caller) = fake_link();
    caller.unbounded_send(start("S1")).unwrap();

    let summary = timeout(
        Duration::from_secs(3),
        run_call(telephony, &connector, &settings()),
    )
    .await
    .expect("call did not end")
    .unwrap();

    assert_eq!(summary.reason, EndReason::LinkClosed(Side::Model));
    assert_eq!(next(&mut to_caller).await, None);
}
