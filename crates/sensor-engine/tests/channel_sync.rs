//! End-to-end tests: a real WebSocket server on a loopback port, the full
//! engine loop on the other side.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sensor_engine::engine::{EngineCore, EngineEvent, EngineHandle, EngineSignal};
use sensor_engine::error::TransportError;
use sensor_engine::transport::ChannelTransport;
use sensor_proto::config::ReconnectConfig;
use sensor_proto::protocol::{Command, CommandVerb};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

fn no_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        enabled: false,
        ..ReconnectConfig::default()
    }
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        enabled: true,
        initial_delay_secs: 0.1,
        max_delay_secs: 0.5,
    }
}

async fn bind() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let url = Url::parse(&format!("ws://127.0.0.1:{}", port)).unwrap();
    (listener, url)
}

async fn accept_ws(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

fn start_engine(
    url: Url,
    reconnect: ReconnectConfig,
) -> (EngineHandle, broadcast::Receiver<EngineSignal>) {
    let (signal_tx, signal_rx) = broadcast::channel(256);
    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(256);
    let core = EngineCore::new(url, reconnect, signal_tx, event_tx);
    let handle = core.handle();
    tokio::spawn(async move {
        let _ = core.run(event_rx).await;
    });
    (handle, signal_rx)
}

/// Poll the handle's view until it satisfies the predicate.
async fn wait_until<F>(handle: &EngineHandle, pred: F)
where
    F: Fn(&[sensor_proto::protocol::SensorRecord]) -> bool,
{
    timeout(WAIT, async {
        loop {
            if pred(&handle.view().await) {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("registry never reached expected state");
}

async fn wait_for_signal<F>(rx: &mut broadcast::Receiver<EngineSignal>, pred: F) -> EngineSignal
where
    F: Fn(&EngineSignal) -> bool,
{
    timeout(WAIT, async {
        loop {
            let signal = rx.recv().await.expect("signal channel closed");
            if pred(&signal) {
                return signal;
            }
        }
    })
    .await
    .expect("expected signal never arrived")
}

fn drain_count<F>(rx: &mut broadcast::Receiver<EngineSignal>, pred: F) -> usize
where
    F: Fn(&EngineSignal) -> bool,
{
    let mut count = 0;
    while let Ok(signal) = rx.try_recv() {
        if pred(&signal) {
            count += 1;
        }
    }
    count
}

#[tokio::test]
async fn snapshot_and_partial_updates_build_one_record_per_id() {
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        for frame in [
            r#"{"id":"s1","name":"Greenhouse","connected":true,"unit":"C","value":"5"}"#,
            r#"{"id":"s2","name":"Cellar","connected":false,"unit":"%","value":""}"#,
            r#"{"id":"s1","value":"7"}"#,
        ] {
            ws.send(Message::Text(frame.to_string())).await.unwrap();
        }
        // Hold the connection open until the client goes away.
        while ws.next().await.is_some() {}
    });

    let (handle, _signals) = start_engine(url, no_reconnect());
    wait_until(&handle, |records| {
        records.len() == 2 && records[0].value == "7"
    })
    .await;

    let records = handle.view().await;
    let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["s1", "s2"], "insertion order per first observation");

    // The partial update overlaid value only; everything else survived.
    assert_eq!(records[0].name, "Greenhouse");
    assert!(records[0].connected);
    assert_eq!(records[0].unit, "C");
    assert_eq!(records[0].value, "7");
    assert!(!records[1].connected);
}

#[tokio::test]
async fn toggle_round_trip_sends_verb_and_applies_optimistically() {
    let (listener, url) = bind().await;
    let (command_tx, command_rx) = oneshot::channel::<String>();

    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        ws.send(Message::Text(
            r#"{"id":"s1","name":"Pump","connected":false}"#.to_string(),
        ))
        .await
        .unwrap();

        // First text frame back must be the connect command.
        let mut command_tx = Some(command_tx);
        while let Some(Ok(frame)) = ws.next().await {
            if let Message::Text(text) = frame {
                if let Some(tx) = command_tx.take() {
                    tx.send(text).unwrap();
                    // Acknowledge authoritatively, with a reading.
                    ws.send(Message::Text(
                        r#"{"id":"s1","connected":true,"value":"3","unit":"bar"}"#.to_string(),
                    ))
                    .await
                    .unwrap();
                }
            }
        }
    });

    let (handle, _signals) = start_engine(url, no_reconnect());
    wait_until(&handle, |records| records.iter().any(|r| r.id == "s1")).await;

    handle.toggle_sensor("s1").await;

    // Optimistic flip, no server acknowledgment needed.
    wait_until(&handle, |records| records[0].connected).await;

    let wire = timeout(WAIT, command_rx).await.unwrap().unwrap();
    assert_eq!(wire, r#"{"command":"connect","id":"s1"}"#);

    // Authoritative update lands on the same record.
    wait_until(&handle, |records| records[0].value == "3").await;
    let record = handle.record("s1").await.unwrap();
    assert!(record.connected);
    assert_eq!(record.unit, "bar");
    assert_eq!(handle.view().await.len(), 1);
}

#[tokio::test]
async fn malformed_frames_are_reported_and_do_not_touch_the_registry() {
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        for frame in [
            r#"{"id":"s1","connected":true,"value":"9"}"#,
            r#"{"value":"13"}"#,
            "definitely not json",
            r#"{"id":"s2","connected":false}"#,
        ] {
            ws.send(Message::Text(frame.to_string())).await.unwrap();
        }
        while ws.next().await.is_some() {}
    });

    let (handle, mut signals) = start_engine(url, no_reconnect());

    let is_rejection = |s: &EngineSignal| matches!(s, EngineSignal::FrameRejected(_));
    wait_for_signal(&mut signals, is_rejection).await;
    wait_for_signal(&mut signals, is_rejection).await;

    // s2 arrives after both bad frames; once it is visible the queue has
    // fully drained past them.
    wait_until(&handle, |records| records.iter().any(|r| r.id == "s2")).await;

    let records = handle.view().await;
    let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["s1", "s2"]);
    assert_eq!(records[0].value, "9", "bad frames merged nothing");

    // Exactly one rejection per bad frame, no stragglers.
    assert_eq!(drain_count(&mut signals, is_rejection), 0);
}

#[tokio::test]
async fn send_while_closed_reports_one_failure_and_still_flips() {
    // Grab a port with nothing listening on it.
    let (listener, url) = bind().await;
    drop(listener);

    let (handle, mut signals) = start_engine(url, no_reconnect());
    wait_for_signal(&mut signals, |s| matches!(s, EngineSignal::ChannelDown)).await;

    handle.toggle_sensor("s9").await;

    let failure = wait_for_signal(&mut signals, |s| {
        matches!(s, EngineSignal::DeliveryFailed { .. })
    })
    .await;
    match failure {
        EngineSignal::DeliveryFailed { id, .. } => assert_eq!(id, "s9"),
        other => panic!("unexpected signal {:?}", other),
    }

    // Intent is recorded locally even though delivery failed.
    let record = handle.record("s9").await.unwrap();
    assert!(record.connected);

    assert_eq!(
        drain_count(&mut signals, |s| matches!(
            s,
            EngineSignal::DeliveryFailed { .. }
        )),
        0,
        "exactly one delivery failure per attempt"
    );
}

#[tokio::test]
async fn reconnect_resumes_updates_and_keeps_stale_state() {
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        // First connection: one update, then drop.
        let mut ws = accept_ws(&listener).await;
        ws.send(Message::Text(
            r#"{"id":"s1","name":"Boiler","connected":true,"value":"60"}"#.to_string(),
        ))
        .await
        .unwrap();
        drop(ws);

        // Second connection after the client's backoff.
        let mut ws = accept_ws(&listener).await;
        ws.send(Message::Text(r#"{"id":"s1","value":"42"}"#.to_string()))
            .await
            .unwrap();
        while ws.next().await.is_some() {}
    });

    let (handle, mut signals) = start_engine(url, fast_reconnect());

    wait_until(&handle, |records| {
        records.iter().any(|r| r.id == "s1" && r.value == "60")
    })
    .await;

    wait_for_signal(&mut signals, |s| matches!(s, EngineSignal::ChannelDown)).await;
    // Stale state survives the drop untouched.
    assert_eq!(handle.record("s1").await.unwrap().value, "60");

    wait_for_signal(&mut signals, |s| matches!(s, EngineSignal::ChannelUp)).await;
    wait_until(&handle, |records| records[0].value == "42").await;

    let record = handle.record("s1").await.unwrap();
    assert!(record.connected, "fields absent from later updates never regress");
    assert_eq!(record.name, "Boiler");
}

#[tokio::test]
async fn open_while_open_errors_and_reopen_after_close_succeeds() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        loop {
            let mut ws = accept_ws(&listener).await;
            tokio::spawn(async move { while ws.next().await.is_some() {} });
        }
    });

    let (event_tx, _event_rx) = mpsc::channel::<EngineEvent>(16);
    let mut transport = ChannelTransport::new(url, event_tx);

    transport.open().await.unwrap();
    assert!(transport.is_open());

    // A double open is a caller bug, reported loudly...
    assert!(matches!(
        transport.open().await,
        Err(TransportError::AlreadyOpen)
    ));
    // ...and it must not tear down the live connection.
    assert!(transport.is_open());

    // Open after close is a fresh connection, not an error.
    transport.close().await;
    assert!(!transport.is_open());
    transport.open().await.unwrap();
    assert!(transport.is_open());
    transport.close().await;
}

#[tokio::test]
async fn negative_reconnect_delays_are_clamped_not_fatal() {
    // Nothing listening, so every open attempt fails and reschedules.
    let (listener, url) = bind().await;
    drop(listener);

    let bad = ReconnectConfig {
        enabled: true,
        initial_delay_secs: -1.0,
        max_delay_secs: -5.0,
    };
    let (_handle, mut signals) = start_engine(url, bad);

    // One ChannelDown per failed attempt; several in a row prove the backoff
    // timer keeps firing on the clamped delay instead of panicking.
    for _ in 0..3 {
        wait_for_signal(&mut signals, |s| matches!(s, EngineSignal::ChannelDown)).await;
    }
}

#[tokio::test]
async fn write_failure_marks_closed_and_reopen_is_clean() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        // First connection: drop right after the handshake so client writes
        // start failing.
        let ws = accept_ws(&listener).await;
        drop(ws);

        // Second connection: prove the reopened channel delivers frames.
        let mut ws = accept_ws(&listener).await;
        ws.send(Message::Text(
            r#"{"id":"fresh","connected":true}"#.to_string(),
        ))
        .await
        .unwrap();
        while ws.next().await.is_some() {}
    });

    let (event_tx, mut event_rx) = mpsc::channel::<EngineEvent>(64);
    let mut transport = ChannelTransport::new(url, event_tx);
    transport.open().await.unwrap();

    // The dropped connection surfaces as a write error within a few sends.
    let command = Command::new(CommandVerb::Connect, "s1");
    timeout(WAIT, async {
        loop {
            match transport.send(&command).await {
                Ok(()) => sleep(Duration::from_millis(20)).await,
                Err(TransportError::Ws(_)) | Err(TransportError::NotOpen) => break,
                Err(e) => panic!("unexpected send error: {}", e),
            }
        }
    })
    .await
    .expect("send never failed against a dropped connection");

    // The write failure invalidated the connection: later sends fail fast.
    assert!(!transport.is_open());
    assert!(matches!(
        transport.send(&command).await,
        Err(TransportError::NotOpen)
    ));

    // Reopen is clean; only the fresh connection feeds the event queue.
    transport.open().await.unwrap();
    timeout(WAIT, async {
        loop {
            match event_rx.recv().await {
                Some(EngineEvent::Inbound(update)) if update.id == "fresh" => break,
                Some(_) => {}
                None => panic!("event queue closed"),
            }
        }
    })
    .await
    .expect("reopened channel never delivered an update");
    assert!(transport.is_open());
    transport.close().await;
}

#[tokio::test]
async fn filter_flag_is_honored_by_the_shared_view() {
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        for frame in [
            r#"{"id":"a","connected":true}"#,
            r#"{"id":"b","connected":false}"#,
        ] {
            ws.send(Message::Text(frame.to_string())).await.unwrap();
        }
        while ws.next().await.is_some() {}
    });

    let (handle, mut signals) = start_engine(url, no_reconnect());
    wait_until(&handle, |records| records.len() == 2).await;

    handle.set_filter(true).await;
    wait_for_signal(&mut signals, |s| matches!(s, EngineSignal::ViewChanged)).await;

    timeout(WAIT, async {
        loop {
            let view = handle.view().await;
            if view.len() == 1 && view[0].id == "a" {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("filtered view never settled");

    handle.set_filter(false).await;
    timeout(WAIT, async {
        loop {
            if handle.view().await.len() == 2 {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("unfiltered view never settled");
}
