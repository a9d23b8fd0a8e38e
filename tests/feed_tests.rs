use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt as _;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use lsr_sync::classify::PushEvent;
use lsr_sync::config::Config;
use lsr_sync::feed::{run_push, FeedEvent};
use lsr_sync::graceful_shutdown;
use lsr_sync::health::HealthCounters;
use lsr_sync::reconnect::LinkState;

fn push_config(ws_url: String) -> Config {
    let mut cfg = Config::default();
    cfg.bridge.ws_url = ws_url;
    cfg.bridge.ws_connect_timeout_ms = 1_000;
    cfg.push.reconnect_base_ms = 20;
    cfg.push.reconnect_cap_ms = 80;
    cfg.push.reconnect_jitter_ms = 0;
    cfg.push.max_attempts = 4;
    cfg
}

async fn next_event(rx: &mut mpsc::Receiver<FeedEvent>) -> FeedEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("feed event in time")
        .expect("feed open")
}

async fn wait_for_link(rx: &mut mpsc::Receiver<FeedEvent>, want: LinkState) -> u32 {
    loop {
        if let FeedEvent::Link { state, attempts } = next_event(rx).await {
            if state == want {
                return attempts;
            }
        }
    }
}

#[tokio::test]
async fn forwards_ticks_and_reconnects_after_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        for round in 0..2 {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
            let frame = format!(r#"{{"type":"quote","symbol":"ES 03-26","last":{}}}"#, 5000 + round);
            ws.send(Message::Text(frame.into())).await.expect("send tick");
            ws.send(Message::Text("not json".into())).await.expect("send junk");
            if round == 0 {
                ws.close(None).await.expect("close");
            } else {
                // Keep the second connection open until the client leaves.
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
        }
    });

    let health = Arc::new(HealthCounters::default());
    let (tx, mut rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = graceful_shutdown::channel();
    let push = tokio::spawn(run_push(
        push_config(format!("ws://{addr}/api/ws")),
        tx,
        health.clone(),
        shutdown_rx,
    ));

    assert_eq!(wait_for_link(&mut rx, LinkState::Connected).await, 0);
    match next_event(&mut rx).await {
        FeedEvent::Push(PushEvent::Tick { symbol, quote }) => {
            assert_eq!(symbol, "ES");
            assert_eq!(quote.last, Some(5000.0));
        }
        other => panic!("expected tick, got {other:?}"),
    }

    assert_eq!(wait_for_link(&mut rx, LinkState::Reconnecting).await, 1);
    assert_eq!(wait_for_link(&mut rx, LinkState::Connected).await, 0);
    match next_event(&mut rx).await {
        FeedEvent::Push(PushEvent::Tick { quote, .. }) => assert_eq!(quote.last, Some(5001.0)),
        other => panic!("expected tick, got {other:?}"),
    }

    graceful_shutdown::request(&shutdown_tx);
    tokio::time::timeout(Duration::from_secs(5), push)
        .await
        .expect("push task exits")
        .expect("join")
        .expect("run_push");
    server.abort();

    let snap = health.snapshot();
    assert_eq!(snap.push_connects, 2);
    assert!(snap.push_malformed >= 1);
    assert!(snap.push_reconnects_scheduled >= 1);
}

#[tokio::test]
async fn silent_peer_is_dropped_after_idle_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    // Completes the handshake, then never reads or writes again.
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(ws);
    });

    let mut cfg = push_config(format!("ws://{addr}/api/ws"));
    cfg.push.ping_interval_ms = 50;
    cfg.push.idle_timeout_ms = 200;
    let health = Arc::new(HealthCounters::default());
    let (tx, mut rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = graceful_shutdown::channel();
    let push = tokio::spawn(run_push(cfg, tx, health.clone(), shutdown_rx));

    assert_eq!(wait_for_link(&mut rx, LinkState::Connected).await, 0);
    let connected_at = tokio::time::Instant::now();
    assert_eq!(wait_for_link(&mut rx, LinkState::Reconnecting).await, 1);
    assert!(connected_at.elapsed() >= Duration::from_millis(150), "dropped by the idle limit, not earlier");

    graceful_shutdown::request(&shutdown_tx);
    tokio::time::timeout(Duration::from_secs(5), push)
        .await
        .expect("push task exits")
        .expect("join")
        .expect("run_push");
    server.abort();
    assert!(health.snapshot().push_reconnects_scheduled >= 1);
}

#[tokio::test]
async fn refused_connects_back_off_with_growing_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let health = Arc::new(HealthCounters::default());
    let (tx, mut rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = graceful_shutdown::channel();
    let push = tokio::spawn(run_push(
        push_config(format!("ws://{addr}/api/ws")),
        tx,
        health.clone(),
        shutdown_rx,
    ));

    let mut seen = Vec::new();
    while seen.len() < 6 {
        seen.push(wait_for_link(&mut rx, LinkState::Reconnecting).await);
    }
    assert_eq!(&seen[..4], &[1, 2, 3, 4]);
    assert!(seen[4..].iter().all(|a| *a == 4), "attempts saturate at max_attempts");

    graceful_shutdown::request(&shutdown_tx);
    tokio::time::timeout(Duration::from_secs(5), push)
        .await
        .expect("push task exits")
        .expect("join")
        .expect("run_push");
    assert_eq!(health.snapshot().push_connects, 0);
}
