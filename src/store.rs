use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::candles::{CandleSeries, ChartQuery};
use crate::health::BridgeState;
use crate::reconnect::LinkState;
use crate::types::{InstrumentLevels, QuoteUpdate, SymbolQuote};

/// Endpoints whose payloads are stored as-is for the presentation layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opaque {
    Status,
    Account,
    Positions,
    Trades,
    Signals,
    SwingPoints,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinkHealth {
    pub bridge: BridgeState,
    pub consecutive_failures: u64,
    pub push: LinkState,
    pub push_attempts: u32,
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self {
            bridge: BridgeState::Healthy,
            consecutive_failures: 0,
            push: LinkState::Disconnected,
            push_attempts: 0,
        }
    }
}

/// Read-only view handed to presentation. Cloned on publish; never mutated afterwards.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StoreSnapshot {
    /// Bumped on every publish.
    pub version: u64,
    pub status: Option<Value>,
    pub account: Option<Value>,
    pub positions: Option<Value>,
    pub quotes: BTreeMap<String, SymbolQuote>,
    pub levels: Vec<InstrumentLevels>,
    pub trades: Option<Value>,
    pub signals: Option<Value>,
    pub swing_points: Option<Value>,
    /// Currently selected chart parameters; may be ahead of `chart` while a load is in flight.
    pub chart_selection: Option<ChartQuery>,
    pub chart: Option<CandleSeries>,
    pub link: LinkHealth,
}

impl StoreSnapshot {
    pub fn quote(&self, symbol: &str) -> Option<&SymbolQuote> {
        self.quotes.get(symbol)
    }
}

/// Merged in-memory state. Mutators return whether anything changed; callers batch
/// changes and call [`StateStore::publish`] once per merge.
pub struct StateStore {
    state: StoreSnapshot,
    tx: watch::Sender<Arc<StoreSnapshot>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(StoreSnapshot::default()));
        Self {
            state: StoreSnapshot::default(),
            tx,
        }
    }

    pub fn state(&self) -> &StoreSnapshot {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.tx.subscribe()
    }

    pub fn merge_quote(&mut self, symbol: &str, update: &QuoteUpdate, now_ms: u64) -> bool {
        if symbol.is_empty() || update.is_empty() {
            return false;
        }
        self.state
            .quotes
            .entry(symbol.to_string())
            .or_default()
            .merge(update, now_ms)
    }

    pub fn merge_quotes(&mut self, updates: &HashMap<String, QuoteUpdate>, now_ms: u64) -> bool {
        let mut changed = false;
        for (symbol, update) in updates {
            changed |= self.merge_quote(symbol, update, now_ms);
        }
        changed
    }

    /// Levels are replaced wholesale, never merged.
    pub fn replace_levels(&mut self, levels: Vec<InstrumentLevels>) -> bool {
        if self.state.levels == levels {
            return false;
        }
        self.state.levels = levels;
        true
    }

    pub fn set_opaque(&mut self, slot: Opaque, value: Value) -> bool {
        let target = match slot {
            Opaque::Status => &mut self.state.status,
            Opaque::Account => &mut self.state.account,
            Opaque::Positions => &mut self.state.positions,
            Opaque::Trades => &mut self.state.trades,
            Opaque::Signals => &mut self.state.signals,
            Opaque::SwingPoints => &mut self.state.swing_points,
        };
        if target.as_ref() == Some(&value) {
            return false;
        }
        *target = Some(value);
        true
    }

    pub fn select_chart(&mut self, query: ChartQuery) -> bool {
        if self.state.chart_selection.as_ref() == Some(&query) {
            return false;
        }
        self.state.chart_selection = Some(query);
        true
    }

    pub fn replace_chart(&mut self, series: CandleSeries) -> bool {
        if self.state.chart.as_ref() == Some(&series) {
            return false;
        }
        self.state.chart = Some(series);
        true
    }

    /// Live price for `symbol`; only touches the chart when it shows that symbol.
    pub fn apply_live_tick(&mut self, symbol: &str, price: f64) -> bool {
        match self.state.chart.as_mut() {
            Some(series) if series.query.symbol == symbol => series.apply_live_tick(price),
            _ => false,
        }
    }

    pub fn set_bridge_health(&mut self, bridge: BridgeState, consecutive_failures: u64) -> bool {
        let link = &mut self.state.link;
        if link.bridge == bridge && link.consecutive_failures == consecutive_failures {
            return false;
        }
        link.bridge = bridge;
        link.consecutive_failures = consecutive_failures;
        true
    }

    pub fn set_push_link(&mut self, push: LinkState, attempts: u32) -> bool {
        let link = &mut self.state.link;
        if link.push == push && link.push_attempts == attempts {
            return false;
        }
        link.push = push;
        link.push_attempts = attempts;
        true
    }

    /// Bump the version and hand a fresh snapshot to subscribers.
    pub fn publish(&mut self) {
        self.state.version = self.state.version.saturating_add(1);
        self.tx.send_replace(Arc::new(self.state.clone()));
    }
}
