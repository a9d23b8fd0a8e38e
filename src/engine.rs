//! The sync engine: one task that owns the store, the refresh scheduler and the staleness
//! guard. Fetches run as futures polled by that same task, so merges never interleave.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use futures_util::future::{join, join_all, BoxFuture};
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt as _, StreamExt as _};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bridge::{swing_points_path, Endpoint, Transport};
use crate::candles::{parse_candles, CandleSeries, ChartQuery};
use crate::classify::{PushEvent, Route};
use crate::config::Config;
use crate::feed::FeedEvent;
use crate::graceful_shutdown;
use crate::health::{BridgeState, HealthCounters};
use crate::payload::{is_error_body, normalize_quotes, parse_levels};
use crate::scheduler::{CycleStart, RefreshScheduler};
use crate::staleness::{StalenessGuard, View, ViewToken};
use crate::store::{Opaque, StateStore, StoreSnapshot};
use crate::types::{now_ms, Channel};

const COMMAND_QUEUE: usize = 64;
const VIEWS: [View; 2] = [View::Chart, View::SwingPoints];

#[derive(Clone, Debug)]
pub enum Command {
    Refresh { channel: Channel, within: Duration },
    SelectChart(ChartQuery),
}

/// Cheap, cloneable front door to a running [`Engine`].
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<StoreSnapshot>>,
}

impl EngineHandle {
    /// Ask for a refresh of `channel` within `within`. Subject to the channel's
    /// minimum interval and coalescing. Waits for queue space; fails only once the
    /// engine has stopped.
    pub async fn request_refresh(&self, channel: Channel, within: Duration) -> anyhow::Result<()> {
        self.send(Command::Refresh { channel, within }).await
    }

    /// Switch the chart view. Any load still in flight for the previous selection is
    /// discarded when it lands.
    pub async fn select_chart(
        &self,
        symbol: &str,
        timeframe: &str,
        hours: u32,
    ) -> anyhow::Result<()> {
        let query = ChartQuery::new(symbol, timeframe, hours)?;
        self.send(Command::SelectChart(query)).await
    }

    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.snapshots.clone()
    }

    async fn send(&self, cmd: Command) -> anyhow::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("sync engine has stopped"))
    }
}

struct CycleOutcome {
    channel: Channel,
    results: Vec<(Endpoint, Option<Value>)>,
    views: Vec<ViewOutcome>,
}

struct ViewOutcome {
    view: View,
    token: ViewToken,
    query: ChartQuery,
    value: Option<Value>,
}

pub struct Engine<T: Transport> {
    cfg: Config,
    transport: Arc<T>,
    store: StateStore,
    scheduler: RefreshScheduler,
    guard: StalenessGuard,
    /// Query of the latest issued load per view, until that load lands.
    outstanding: HashMap<View, ChartQuery>,
    chart: ChartQuery,
    health: Arc<HealthCounters>,
    cmd_rx: mpsc::Receiver<Command>,
    cycles: FuturesUnordered<BoxFuture<'static, CycleOutcome>>,
    views: FuturesUnordered<BoxFuture<'static, ViewOutcome>>,
}

impl<T: Transport> Engine<T> {
    pub fn new(
        cfg: Config,
        transport: Arc<T>,
        health: Arc<HealthCounters>,
    ) -> anyhow::Result<(Self, EngineHandle)> {
        cfg.validate()?;
        let chart = ChartQuery::new(&cfg.chart.symbol, &cfg.chart.timeframe, cfg.chart.hours)
            .context("chart defaults")?;
        let scheduler = RefreshScheduler::new(
            Duration::from_millis(cfg.sync.fast_min_interval_ms),
            Duration::from_millis(cfg.sync.slow_min_interval_ms),
        );

        let mut store = StateStore::new();
        store.select_chart(chart.clone());
        store.publish();

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let handle = EngineHandle {
            cmd_tx,
            snapshots: store.subscribe(),
        };
        let engine = Self {
            cfg,
            transport,
            store,
            scheduler,
            guard: StalenessGuard::new(),
            outstanding: HashMap::new(),
            chart,
            health,
            cmd_rx,
            cycles: FuturesUnordered::new(),
            views: FuturesUnordered::new(),
        };
        Ok((engine, handle))
    }

    /// Drive polling, push events and commands until shutdown. In-flight fetches are
    /// dropped on exit.
    pub async fn run(
        mut self,
        mut feed: mpsc::Receiver<FeedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let mut fast_poll = poll_interval(self.cfg.sync.fast_poll_ms);
        let mut slow_poll = poll_interval(self.cfg.sync.slow_poll_ms);
        let mut cmds_open = true;
        let mut feed_open = true;

        info!(
            chart = %self.chart.symbol,
            fast_poll_ms = self.cfg.sync.fast_poll_ms,
            slow_poll_ms = self.cfg.sync.slow_poll_ms,
            "sync engine started"
        );

        loop {
            let deadline = self.scheduler.next_deadline();
            tokio::select! {
                _ = graceful_shutdown::wait(&mut shutdown) => break,
                cmd = self.cmd_rx.recv(), if cmds_open => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => cmds_open = false,
                },
                ev = feed.recv(), if feed_open => match ev {
                    Some(ev) => self.on_feed(ev),
                    None => {
                        debug!("push feed closed");
                        feed_open = false;
                    }
                },
                _ = fast_poll.tick() => {
                    self.scheduler.request_refresh(Channel::Fast, Instant::now(), Duration::ZERO);
                }
                _ = slow_poll.tick() => {
                    self.scheduler.request_refresh(Channel::Slow, Instant::now(), Duration::ZERO);
                }
                _ = sleep_until_opt(deadline), if deadline.is_some() => {
                    for channel in self.scheduler.due(Instant::now()) {
                        self.run_cycle(channel);
                    }
                }
                Some(out) = self.cycles.next(), if !self.cycles.is_empty() => {
                    self.finish_cycle(out);
                }
                Some(out) = self.views.next(), if !self.views.is_empty() => {
                    let changed = self.apply_view(out) | self.refresh_bridge_health();
                    if changed {
                        self.store.publish();
                    }
                }
            }
        }

        info!("sync engine stopped");
        Ok(())
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Refresh { channel, within } => {
                self.scheduler.request_refresh(channel, Instant::now(), within);
            }
            Command::SelectChart(query) => {
                info!(symbol = %query.symbol, tf = %query.timeframe, hours = query.hours, "chart selected");
                self.chart = query.clone();
                if self.store.select_chart(query) {
                    self.store.publish();
                }
                for view in VIEWS {
                    let load = self.issue_view(view);
                    self.views.push(load);
                }
            }
        }
    }

    fn on_feed(&mut self, ev: FeedEvent) {
        match ev {
            FeedEvent::Link { state, attempts } => {
                if self.store.set_push_link(state, attempts) {
                    self.store.publish();
                }
            }
            FeedEvent::Push(ev) => self.on_push(ev),
        }
    }

    fn on_push(&mut self, ev: PushEvent) {
        match ev.route(self.cfg.push.refresh_on_unknown) {
            Route::MergeQuote => {
                let PushEvent::Tick { symbol, quote } = ev else {
                    return;
                };
                let mut changed = self.store.merge_quote(&symbol, &quote, now_ms());
                if let Some(price) = quote.last {
                    if self.store.apply_live_tick(&symbol, price) {
                        self.health.inc_live_ticks_applied(1);
                        changed = true;
                    }
                }
                if changed {
                    self.store.publish();
                }
            }
            Route::Refresh(channel) => {
                let within = match channel {
                    Channel::Fast => self.cfg.sync.push_fast_within_ms,
                    Channel::Slow => self.cfg.sync.push_slow_within_ms,
                };
                debug!(kind = ev.kind(), %channel, within_ms = within, "push event triggers refresh");
                self.scheduler
                    .request_refresh(channel, Instant::now(), Duration::from_millis(within));
            }
            Route::Drop => {
                debug!(kind = ev.kind(), "dropping unrecognised push event");
            }
        }
    }

    fn run_cycle(&mut self, channel: Channel) {
        match self.scheduler.channel_mut(channel).begin_cycle() {
            CycleStart::Coalesced => {
                self.health.inc_cycles_coalesced(1);
                debug!(%channel, "cycle in flight; trailing re-run queued");
                return;
            }
            CycleStart::Started => {}
        }
        self.health.inc_cycles_started(1);

        let endpoints: &'static [Endpoint] = match channel {
            Channel::Fast => &Endpoint::FAST,
            Channel::Slow => &Endpoint::SLOW,
        };
        // View reloads ride along with the slow batch so they share its in-flight state.
        // A view whose current selection is still loading is left alone.
        let mut view_loads = Vec::new();
        if channel == Channel::Slow {
            for view in VIEWS {
                if self.outstanding.get(&view) == Some(&self.chart) {
                    debug!(?view, "view load already in flight; not reissued");
                    continue;
                }
                view_loads.push(self.issue_view(view));
            }
        }

        let transport = self.transport.clone();
        self.cycles.push(
            async move {
                let fetches = endpoints.iter().map(|&ep| {
                    let transport = transport.clone();
                    async move { (ep, transport.get_json(ep.path()).await) }
                });
                let (results, views) = join(join_all(fetches), join_all(view_loads)).await;
                CycleOutcome {
                    channel,
                    results,
                    views,
                }
            }
            .boxed(),
        );
    }

    fn finish_cycle(&mut self, out: CycleOutcome) {
        let now = now_ms();
        let mut changed = false;

        for (ep, value) in out.results {
            let Some(value) = value.filter(|v| !is_error_body(v)) else {
                self.health.record_fetch(false, now);
                continue;
            };
            self.health.record_fetch(true, now);
            changed |= self.merge_endpoint(ep, value, now);
        }
        for view in out.views {
            changed |= self.apply_view(view);
        }
        changed |= self.refresh_bridge_health();
        if changed {
            self.store.publish();
        }

        if self.scheduler.channel_mut(out.channel).finish_cycle() {
            debug!(channel = %out.channel, "running coalesced follow-up");
            self.scheduler
                .request_refresh(out.channel, Instant::now(), Duration::ZERO);
        }
    }

    fn merge_endpoint(&mut self, ep: Endpoint, value: Value, now: u64) -> bool {
        match ep {
            Endpoint::Quotes => self.store.merge_quotes(&normalize_quotes(&value), now),
            Endpoint::Levels => match parse_levels(&value) {
                Some(levels) => self.store.replace_levels(levels),
                None => {
                    warn!(path = ep.path(), "unrecognised levels payload");
                    false
                }
            },
            _ => match ep.opaque_slot() {
                Some(slot) => self.store.set_opaque(slot, value),
                None => false,
            },
        }
    }

    /// Take a fresh token for `view` against the active selection; every older load of
    /// that view becomes stale.
    fn issue_view(&mut self, view: View) -> BoxFuture<'static, ViewOutcome> {
        let token = self.guard.begin_request(view);
        let query = self.chart.clone();
        self.outstanding.insert(view, query.clone());
        let path = match view {
            View::Chart => query.candles_path(),
            View::SwingPoints => swing_points_path(&query.symbol),
        };
        let transport = self.transport.clone();
        async move {
            let value = transport.get_json(&path).await;
            ViewOutcome {
                view,
                token,
                query,
                value,
            }
        }
        .boxed()
    }

    fn apply_view(&mut self, out: ViewOutcome) -> bool {
        let now = now_ms();
        let value = out.value.filter(|v| !is_error_body(v));
        self.health.record_fetch(value.is_some(), now);

        if !self.guard.is_current(out.view, out.token) {
            self.health.inc_stale_dropped(1);
            debug!(
                view = ?out.view,
                token = out.token.0,
                symbol = %out.query.symbol,
                "discarding stale view response"
            );
            return false;
        }
        self.outstanding.remove(&out.view);

        let Some(value) = value else {
            return false;
        };
        match out.view {
            View::Chart => match parse_candles(&value, self.cfg.chart.max_candles) {
                Some(candles) => self
                    .store
                    .replace_chart(CandleSeries::new(out.query, candles)),
                None => {
                    warn!(symbol = %out.query.symbol, "unrecognised candles payload");
                    false
                }
            },
            View::SwingPoints => self.store.set_opaque(Opaque::SwingPoints, value),
        }
    }

    fn refresh_bridge_health(&mut self) -> bool {
        let failures = self.health.consecutive_failures();
        let state = BridgeState::from_failures(failures, self.cfg.bridge.offline_after_failures);
        self.store.set_bridge_health(state, failures)
    }
}

fn poll_interval(ms: u64) -> tokio::time::Interval {
    let mut iv = tokio::time::interval(Duration::from_millis(ms));
    iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
    iv
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
