use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use futures_util::{SinkExt as _, StreamExt as _};
use rand::rngs::StdRng;
use rand::SeedableRng as _;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::classify::{decode_frame, PushEvent};
use crate::config::Config;
use crate::graceful_shutdown;
use crate::health::HealthCounters;
use crate::reconnect::{Backoff, ChannelManager, LinkState};

/// What the push task reports to the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    Link { state: LinkState, attempts: u32 },
    Push(PushEvent),
}

enum RunEnd {
    Shutdown,
    Closed(String),
}

/// Own the push connection for the process lifetime: connect, forward decoded events,
/// and reconnect with capped exponential backoff plus jitter after every drop.
pub async fn run_push(
    cfg: Config,
    events: mpsc::Sender<FeedEvent>,
    health: Arc<HealthCounters>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut mgr = ChannelManager::new(Backoff::from_config(&cfg.push));
    let mut rng = StdRng::from_entropy();

    'outer: loop {
        if *shutdown.borrow() {
            break;
        }

        mgr.begin_connect();
        report_link(&events, &mgr).await?;

        match ws_run_once(&cfg, &mut mgr, &events, &health, shutdown.clone()).await {
            Ok(RunEnd::Shutdown) => break,
            Ok(RunEnd::Closed(reason)) => {
                info!(%reason, "push link closed");
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "push link error");
            }
        }

        if let Some(delay) = mgr.on_disconnected(Instant::now(), &mut rng) {
            health.inc_push_reconnects_scheduled(1);
            info!(
                delay_ms = delay.as_millis() as u64,
                attempts = mgr.attempts(),
                "push reconnect scheduled"
            );
        }
        report_link(&events, &mgr).await?;

        let Some(deadline) = mgr.reconnect_deadline() else {
            continue;
        };
        tokio::select! {
            _ = graceful_shutdown::wait(&mut shutdown) => break 'outer,
            _ = tokio::time::sleep_until(deadline) => {}
        }
        mgr.take_reconnect_due(Instant::now());
    }

    mgr.shutdown();
    let _ = events.try_send(FeedEvent::Link {
        state: mgr.state(),
        attempts: mgr.attempts(),
    });
    Ok(())
}

async fn report_link(events: &mpsc::Sender<FeedEvent>, mgr: &ChannelManager) -> anyhow::Result<()> {
    events
        .send(FeedEvent::Link {
            state: mgr.state(),
            attempts: mgr.attempts(),
        })
        .await
        .map_err(|_| anyhow::anyhow!("push event receiver dropped"))
}

async fn ws_run_once(
    cfg: &Config,
    mgr: &mut ChannelManager,
    events: &mpsc::Sender<FeedEvent>,
    health: &HealthCounters,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<RunEnd> {
    let ws_url = cfg.bridge.ws_url.as_str();
    info!(%ws_url, "connecting push link");

    let connect = tokio_tungstenite::connect_async(ws_url);
    let (ws, _) = tokio::select! {
        _ = graceful_shutdown::wait(&mut shutdown) => return Ok(RunEnd::Shutdown),
        res = tokio::time::timeout(cfg.bridge.ws_connect_timeout(), connect) => {
            res.context("connect push link: timed out")?
                .context("connect push link")?
        }
    };

    mgr.on_connected();
    health.inc_push_connects(1);
    report_link(events, mgr).await?;
    info!(%ws_url, "push link connected");

    let (mut sink, mut stream) = ws.split();

    let ping_every = Duration::from_millis(cfg.push.ping_interval_ms);
    let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    let idle_limit = Duration::from_millis(cfg.push.idle_timeout_ms);
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            _ = graceful_shutdown::wait(&mut shutdown) => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(RunEnd::Shutdown);
            }
            _ = ping.tick() => {
                sink.send(Message::Ping(Default::default()))
                    .await
                    .context("send ping")?;
            }
            _ = tokio::time::sleep_until(last_inbound + idle_limit) => {
                anyhow::bail!("push link idle for {}ms", idle_limit.as_millis());
            }
            msg = stream.next() => {
                let Some(msg) = msg else {
                    return Ok(RunEnd::Closed("stream ended".to_string()));
                };
                let msg = msg.context("push read")?;
                last_inbound = Instant::now();
                match msg {
                    Message::Text(txt) => {
                        forward_frame(txt.as_str(), events, health).await?;
                    }
                    Message::Binary(bin) => {
                        let txt = String::from_utf8_lossy(&bin);
                        forward_frame(&txt, events, health).await?;
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(frame) => {
                        return Ok(RunEnd::Closed(format!("{frame:?}")));
                    }
                    Message::Frame(_) => {}
                }
            }
        }
    }
}

async fn forward_frame(
    txt: &str,
    events: &mpsc::Sender<FeedEvent>,
    health: &HealthCounters,
) -> anyhow::Result<()> {
    health.inc_push_frames(1);
    let decoded = decode_frame(txt);
    if decoded.is_empty() {
        health.inc_push_malformed(1);
        debug!(len = txt.len(), "dropping malformed push frame");
        return Ok(());
    }
    for ev in decoded {
        events
            .send(FeedEvent::Push(ev))
            .await
            .map_err(|_| anyhow::anyhow!("push event receiver dropped"))?;
    }
    Ok(())
}
