use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lsr_sync::bridge::HttpBridge;
use lsr_sync::config::Config;
use lsr_sync::engine::{Engine, EngineHandle};
use lsr_sync::feed::{self, FeedEvent};
use lsr_sync::graceful_shutdown;
use lsr_sync::health::{spawn_health_writer, HealthCounters};

const FEED_QUEUE: usize = 4_096;

#[derive(Parser, Debug)]
#[command(
    name = "lsr-sync",
    version,
    about = "Keeps a local view of the dashboard bridge in sync (polling + push)"
)]
struct Args {
    /// TOML config; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override `bridge.http_base`.
    #[arg(long)]
    bridge: Option<String>,
    /// Override `bridge.ws_url`.
    #[arg(long)]
    push_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let mut cfg = match args.config.as_ref() {
        Some(path) => Config::load(path).context("load config")?,
        None => Config::default(),
    };
    if let Some(base) = args.bridge {
        cfg.bridge.http_base = base;
    }
    if let Some(url) = args.push_url {
        cfg.bridge.ws_url = url;
    }
    cfg.validate().context("validate config")?;
    info!(
        http_base = %cfg.bridge.http_base,
        ws_url = %cfg.bridge.ws_url,
        chart = %cfg.chart.symbol,
        "starting"
    );

    let (shutdown_tx, shutdown_rx) = graceful_shutdown::channel();
    let health = Arc::new(HealthCounters::default());
    let transport = Arc::new(HttpBridge::new(&cfg.bridge).context("http bridge")?);
    let (engine, handle) = Engine::new(cfg.clone(), transport, health.clone())?;
    let (feed_tx, feed_rx) = mpsc::channel::<FeedEvent>(FEED_QUEUE);

    let push_handle = tokio::spawn(feed::run_push(
        cfg.clone(),
        feed_tx,
        health.clone(),
        shutdown_rx.clone(),
    ));
    let engine_handle = tokio::spawn(engine.run(feed_rx, shutdown_rx.clone()));
    let health_handle = spawn_health_writer(cfg.health.clone(), health, shutdown_rx.clone());
    let view_handle = tokio::spawn(log_snapshots(handle, shutdown_rx));

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("ctrl-c received; shutting down");
    graceful_shutdown::request(&shutdown_tx);

    engine_handle.await.context("engine task join")??;
    push_handle.await.context("push task join")??;
    health_handle.await.context("health task join")?;
    view_handle.await.context("view task join")?;

    info!("done");
    Ok(())
}

/// Stand-in for the presentation layer: logs a summary of every published snapshot.
async fn log_snapshots(handle: EngineHandle, mut shutdown: watch::Receiver<bool>) {
    let mut rx = handle.subscribe();
    loop {
        tokio::select! {
            _ = graceful_shutdown::wait(&mut shutdown) => break,
            res = rx.changed() => {
                if res.is_err() {
                    break;
                }
                let snap = rx.borrow_and_update().clone();
                info!(
                    version = snap.version,
                    quotes = snap.quotes.len(),
                    levels = snap.levels.len(),
                    candles = snap.chart.as_ref().map_or(0, |c| c.candles.len()),
                    bridge = ?snap.link.bridge,
                    push = ?snap.link.push,
                    "snapshot"
                );
            }
        }
    }
}
