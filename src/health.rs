use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::HealthConfig;
use crate::graceful_shutdown;
use crate::recorder::JsonlAppender;
use crate::types::now_ms;

/// Bridge reachability as seen by the poll path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Healthy,
    Degraded,
    Offline,
}

impl BridgeState {
    pub fn from_failures(consecutive_failures: u64, offline_after: u64) -> Self {
        if consecutive_failures == 0 {
            BridgeState::Healthy
        } else if consecutive_failures < offline_after {
            BridgeState::Degraded
        } else {
            BridgeState::Offline
        }
    }
}

#[derive(Default)]
pub struct HealthCounters {
    cycles_started: AtomicU64,
    cycles_coalesced: AtomicU64,
    fetch_ok: AtomicU64,
    fetch_failed: AtomicU64,
    consecutive_failures: AtomicU64,
    last_success_ms: AtomicU64,
    last_failure_ms: AtomicU64,
    stale_dropped: AtomicU64,
    push_frames: AtomicU64,
    push_malformed: AtomicU64,
    push_connects: AtomicU64,
    push_reconnects_scheduled: AtomicU64,
    live_ticks_applied: AtomicU64,
}

impl HealthCounters {
    pub fn inc_cycles_started(&self, n: u64) {
        self.cycles_started.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_cycles_coalesced(&self, n: u64) {
        self.cycles_coalesced.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_fetch(&self, ok: bool, ts_ms: u64) {
        if ok {
            self.fetch_ok.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.last_success_ms.store(ts_ms, Ordering::Relaxed);
        } else {
            self.fetch_failed.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            self.last_failure_ms.store(ts_ms, Ordering::Relaxed);
        }
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn inc_stale_dropped(&self, n: u64) {
        self.stale_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_push_frames(&self, n: u64) {
        self.push_frames.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_push_malformed(&self, n: u64) {
        self.push_malformed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_push_connects(&self, n: u64) {
        self.push_connects.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_push_reconnects_scheduled(&self, n: u64) {
        self.push_reconnects_scheduled.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_live_ticks_applied(&self, n: u64) {
        self.live_ticks_applied.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            ts_ms: now_ms(),
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_coalesced: self.cycles_coalesced.load(Ordering::Relaxed),
            fetch_ok: self.fetch_ok.load(Ordering::Relaxed),
            fetch_failed: self.fetch_failed.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_success_ms: nonzero(self.last_success_ms.load(Ordering::Relaxed)),
            last_failure_ms: nonzero(self.last_failure_ms.load(Ordering::Relaxed)),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
            push_frames: self.push_frames.load(Ordering::Relaxed),
            push_malformed: self.push_malformed.load(Ordering::Relaxed),
            push_connects: self.push_connects.load(Ordering::Relaxed),
            push_reconnects_scheduled: self.push_reconnects_scheduled.load(Ordering::Relaxed),
            live_ticks_applied: self.live_ticks_applied.load(Ordering::Relaxed),
        }
    }
}

fn nonzero(v: u64) -> Option<u64> {
    (v != 0).then_some(v)
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub ts_ms: u64,
    pub cycles_started: u64,
    pub cycles_coalesced: u64,
    pub fetch_ok: u64,
    pub fetch_failed: u64,
    pub consecutive_failures: u64,
    pub last_success_ms: Option<u64>,
    pub last_failure_ms: Option<u64>,
    pub stale_dropped: u64,
    pub push_frames: u64,
    pub push_malformed: u64,
    pub push_connects: u64,
    pub push_reconnects_scheduled: u64,
    pub live_ticks_applied: u64,
}

/// Periodic heartbeat: a structured log line, plus a JSONL record when configured.
pub fn spawn_health_writer(
    cfg: HealthConfig,
    counters: Arc<HealthCounters>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut out = match cfg.jsonl_path.as_ref().map(JsonlAppender::open).transpose() {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "open health jsonl failed; heartbeat goes to log only");
                None
            }
        };

        let mut tick = tokio::time::interval(Duration::from_millis(cfg.heartbeat_ms));
        tick.tick().await;
        loop {
            tokio::select! {
                _ = graceful_shutdown::wait(&mut shutdown) => break,
                _ = tick.tick() => {
                    let snap = counters.snapshot();
                    info!(
                        cycles = snap.cycles_started,
                        coalesced = snap.cycles_coalesced,
                        fetch_failed = snap.fetch_failed,
                        consecutive_failures = snap.consecutive_failures,
                        stale_dropped = snap.stale_dropped,
                        push_frames = snap.push_frames,
                        push_connects = snap.push_connects,
                        "heartbeat"
                    );
                    if let Some(out) = out.as_mut() {
                        if let Err(e) = write_line(out, &snap) {
                            warn!(error = %e, "health heartbeat write failed");
                        }
                    }
                }
            }
        }

        if let Some(mut out) = out {
            if let Err(e) = out.flush_and_sync() {
                warn!(error = %e, "health jsonl flush/sync failed");
            }
        }
    })
}

fn write_line(out: &mut JsonlAppender, snap: &HealthSnapshot) -> anyhow::Result<()> {
    let json = serde_json::to_string(snap)?;
    out.write_line(&json)?;
    Ok(())
}
