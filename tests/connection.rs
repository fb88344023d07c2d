//! Integration tests for the connection lifecycle manager, run against an
//! in-process WebSocket peer.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use url::Url;

use sprawl::bridge::Bridge;
use sprawl::connection::ConnectionConfig;
use sprawl::elements::MessageChain;
use sprawl::event::Event;
use sprawl::onebot::OneBot;
use sprawl::selector::Selector;
use sprawl::standard::{MessageRevoke, MessageSend, MessageTarget, SendMessage};

const SELF_ID: u64 = 99;

fn lifecycle_frame() -> String {
    json!({
        "post_type": "meta_event",
        "meta_event_type": "lifecycle",
        "sub_type": "connect",
        "self_id": SELF_ID,
        "time": 1_700_000_000,
    })
    .to_string()
}

fn account_route() -> Selector {
    Selector::new().land("qq").account(SELF_ID.to_string())
}

async fn bind_listener() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    let url = Url::parse(&format!("ws://{addr}/")).expect("url");
    (listener, url)
}

async fn accept_ws(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.expect("tcp accept");
    tokio_tungstenite::accept_async(stream).await.expect("ws accept")
}

async fn next_event(rx: &mut mpsc::Receiver<Event>) -> Event {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within deadline")
        .expect("bus open")
}

#[tokio::test]
async fn peer_close_deregisters_accounts_before_reconnect() {
    let (listener, url) = bind_listener().await;
    let (bridge, mut events) = Bridge::new(64);
    let config =
        ConnectionConfig::new(url).with_reconnect_interval(Duration::from_millis(200));
    let handle = bridge
        .start_protocol(&OneBot, config)
        .expect("assemble protocol");

    // First session: announce the account, then drop the socket.
    let mut ws = accept_ws(&listener).await;
    ws.send(Message::text(lifecycle_frame())).await.expect("send lifecycle");

    match next_event(&mut events).await {
        Event::AccountRegistered { route } => assert_eq!(route, account_route()),
        other => panic!("expected registration, got {other:?}"),
    }
    assert!(bridge.accounts().contains(&account_route()));
    assert!(handle.connection().alive());

    drop(ws);

    // Deregistration is visible on the bus...
    match next_event(&mut events).await {
        Event::AccountUnregistered { route } => assert_eq!(route, account_route()),
        other => panic!("expected deregistration, got {other:?}"),
    }

    // ...and has happened strictly before the reconnect reaches us: by the
    // time the peer sees the second connect, the registry must be clean.
    let _second = timeout(Duration::from_secs(5), accept_ws(&listener))
        .await
        .expect("reconnect within deadline");
    assert!(bridge.accounts().is_empty());

    handle.stop().await;
}

#[tokio::test]
async fn shutdown_short_circuits_backoff() {
    let (listener, url) = bind_listener().await;
    let (bridge, mut events) = Bridge::new(64);
    // A backoff long enough that only the shutdown signal can explain a
    // fast exit.
    let config = ConnectionConfig::new(url).with_reconnect_interval(Duration::from_secs(60));
    let handle = bridge
        .start_protocol(&OneBot, config)
        .expect("assemble protocol");

    let mut ws = accept_ws(&listener).await;
    ws.send(Message::text(lifecycle_frame())).await.expect("send lifecycle");
    let _ = next_event(&mut events).await;

    // Close from the peer; the task enters its backoff wait.
    drop(ws);
    let _ = next_event(&mut events).await; // AccountUnregistered
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    handle.stop().await;
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "stop() must interrupt the backoff wait, took {:?}",
        started.elapsed()
    );

    // No further connect attempt happened.
    let extra = timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(extra.is_err(), "no reconnect after shutdown");
}

/// Serve one session: announce the account, answer `send_msg` with a fixed
/// message id, answer anything else with a failure retcode, and relay one
/// unknown frame followed by a group message when asked.
async fn scripted_session(mut ws: WebSocketStream<TcpStream>) {
    ws.send(Message::text(lifecycle_frame())).await.expect("send lifecycle");

    // Frames whose inertness the client must prove: an unknown
    // discriminator, then a real message on the same connection.
    ws.send(Message::text(json!({ "post_type": "sorcery" }).to_string()))
        .await
        .expect("send unknown frame");
    ws.send(Message::text(
        json!({
            "post_type": "message",
            "message_type": "group",
            "self_id": SELF_ID,
            "group_id": 42,
            "user_id": 7,
            "message_id": 555,
            "message": [ { "type": "text", "data": { "text": "ping" } } ],
            "time": 1_700_000_000,
        })
        .to_string(),
    ))
    .await
    .expect("send group message");

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else { continue };
        let frame: Value = serde_json::from_str(text.as_str()).expect("action json");
        let echo = frame.get("echo").cloned().unwrap_or(Value::Null);
        let response = match frame.get("action").and_then(Value::as_str) {
            Some("send_msg") => json!({
                "status": "ok",
                "retcode": 0,
                "data": { "message_id": 123 },
                "echo": echo,
            }),
            _ => json!({
                "status": "failed",
                "retcode": 100,
                "message": "not supported by this endpoint",
                "echo": echo,
            }),
        };
        ws.send(Message::text(response.to_string())).await.expect("respond");
    }
}

#[tokio::test]
async fn calls_correlate_and_unknown_frames_are_inert() {
    let (listener, url) = bind_listener().await;
    let (bridge, mut events) = Bridge::new(64);
    // Strict mode: unknown discriminators are reported, and must still not
    // disturb the rest of the stream.
    let config = ConnectionConfig::new(url)
        .with_reconnect_interval(Duration::from_millis(200))
        .with_strict_frames(true);
    let handle = bridge
        .start_protocol(&OneBot, config)
        .expect("assemble protocol");

    let server = tokio::spawn(async move {
        let ws = accept_ws(&listener).await;
        scripted_session(ws).await;
    });

    let _ = next_event(&mut events).await; // AccountRegistered

    // The unknown frame produced nothing; the group message right behind
    // it still came through intact.
    match next_event(&mut events).await {
        Event::MessageReceived {
            scene,
            sender,
            message,
            message_id,
            ..
        } => {
            assert_eq!(scene, Selector::new().land("qq").group("42"));
            assert_eq!(sender, Selector::new().land("qq").group("42").member("7"));
            assert_eq!(message, MessageChain::text("ping"));
            assert_eq!(message_id, "555");
        }
        other => panic!("expected the group message, got {other:?}"),
    }

    // Outbound call with a correlated success response.
    let resolver = handle.connection().resolver();
    let sent = resolver
        .call::<MessageSend>(SendMessage {
            target: Selector::new().land("qq").group("42"),
            message: MessageChain::text("pong"),
            reply: None,
        })
        .await
        .expect("send resolves and succeeds");
    assert_eq!(
        sent,
        Selector::new().land("qq").group("42").message("123")
    );

    // A failing retcode surfaces as a domain error carrying the wire text.
    let err = resolver
        .call::<MessageRevoke>(MessageTarget {
            target: Selector::new().land("qq").group("42").message("123"),
        })
        .await
        .expect_err("peer rejects delete_msg");
    let text = err.to_string();
    assert!(text.contains("retcode 100"), "unexpected error: {text}");

    handle.stop().await;
    server.abort();
}

#[tokio::test]
async fn calls_fail_cleanly_when_disconnected() {
    let (listener, url) = bind_listener().await;
    let (bridge, mut events) = Bridge::new(64);
    let config =
        ConnectionConfig::new(url).with_reconnect_interval(Duration::from_secs(60));
    let handle = bridge
        .start_protocol(&OneBot, config)
        .expect("assemble protocol");

    let mut ws = accept_ws(&listener).await;
    ws.send(Message::text(lifecycle_frame())).await.expect("send lifecycle");
    let _ = next_event(&mut events).await;
    drop(ws);
    let _ = next_event(&mut events).await; // AccountUnregistered

    // The channel is down and the task is backing off: calls fail
    // immediately instead of hanging.
    let resolver = handle.connection().resolver();
    let err = resolver
        .call::<MessageSend>(SendMessage {
            target: Selector::new().land("qq").group("42"),
            message: MessageChain::text("void"),
            reply: None,
        })
        .await
        .expect_err("no live channel");
    assert!(err.to_string().contains("not established"), "got: {err}");

    handle.stop().await;
}
