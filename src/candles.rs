use serde::Serialize;
use serde_json::{Map, Value};

use crate::json_util::{field, field_f64, parse_i64};
use crate::types::Timeframe;

pub const EMA_PERIODS: [usize; 3] = [20, 50, 200];

const MAX_SYMBOL_LEN: usize = 8;
const MAX_HOURS: u32 = 168;

/// Parameters of the navigable chart view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChartQuery {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub hours: u32,
}

impl ChartQuery {
    pub fn new(symbol: &str, timeframe: &str, hours: u32) -> anyhow::Result<Self> {
        let symbol = symbol.trim();
        if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
            anyhow::bail!("chart symbol must be 1..={MAX_SYMBOL_LEN} chars, got {symbol:?}");
        }
        if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            anyhow::bail!("chart symbol must be alphanumeric, got {symbol:?}");
        }
        let Some(timeframe) = Timeframe::parse(timeframe) else {
            anyhow::bail!("unsupported timeframe {timeframe:?} (want 1m|5m|15m|1h)");
        };
        if !(1..=MAX_HOURS).contains(&hours) {
            anyhow::bail!("chart hours must be in [1, {MAX_HOURS}], got {hours}");
        }
        Ok(Self {
            symbol: symbol.to_ascii_uppercase(),
            timeframe,
            hours,
        })
    }

    pub fn candles_path(&self) -> String {
        format!(
            "/api/candles?symbol={}&tf={}&hours={}",
            self.symbol, self.timeframe, self.hours
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Candle {
    /// Bar open time, unix seconds.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmaPoint {
    pub time: i64,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CandleSeries {
    pub query: ChartQuery,
    pub candles: Vec<Candle>,
    pub ema20: Vec<EmaPoint>,
    pub ema50: Vec<EmaPoint>,
    pub ema200: Vec<EmaPoint>,
}

impl CandleSeries {
    pub fn new(query: ChartQuery, candles: Vec<Candle>) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let overlay = |period: usize| -> Vec<EmaPoint> {
            calc_ema(&closes, period)
                .into_iter()
                .zip(candles.iter())
                .filter_map(|(v, c)| {
                    v.map(|value| EmaPoint {
                        time: c.time,
                        value: round4(value),
                    })
                })
                .collect()
        };
        let [p20, p50, p200] = EMA_PERIODS;
        let ema20 = overlay(p20);
        let ema50 = overlay(p50);
        let ema200 = overlay(p200);
        Self {
            query,
            candles,
            ema20,
            ema50,
            ema200,
        }
    }

    /// Fold a live price into the most recent bar.
    ///
    /// The bar count and the bar's open time never change here; a new bar only appears
    /// with the next full reload. Returns false when there is no bar to update.
    pub fn apply_live_tick(&mut self, price: f64) -> bool {
        if !price.is_finite() {
            return false;
        }
        let Some(bar) = self.candles.last_mut() else {
            return false;
        };
        bar.high = bar.high.max(price);
        bar.low = bar.low.min(price);
        bar.close = price;
        true
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }
}

/// EMA seeded with the SMA of the first `period` closes. Same length as `closes`;
/// positions before the seed are `None`.
pub fn calc_ema(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || closes.len() < period {
        return vec![None; closes.len()];
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = vec![None; period - 1];
    let seed = closes[..period].iter().sum::<f64>() / period as f64;
    out.push(Some(seed));
    let mut prev = seed;
    for close in &closes[period..] {
        prev = close * k + prev * (1.0 - k);
        out.push(Some(prev));
    }
    out
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Accepts `time`/`Time`, `close`/`Close` etc. Rows without a time or a finite close are
/// rejected; a missing open/high/low falls back to the close.
pub fn normalize_candle(obj: &Map<String, Value>) -> Option<Candle> {
    let time = parse_i64(field(obj, &["time", "t", "timestamp"]))?;
    let close = field_f64(obj, &["close", "c"])?;
    let open = field_f64(obj, &["open", "o"]).unwrap_or(close);
    let high = field_f64(obj, &["high", "h"]).unwrap_or(close);
    let low = field_f64(obj, &["low", "l"]).unwrap_or(close);
    Some(Candle {
        time,
        open,
        high: high.max(open).max(close),
        low: low.min(open).min(close),
        close,
        volume: field_f64(obj, &["volume", "v"]),
    })
}

/// Decode a candles response (`{"candles": [...]}` or a bare array), keeping at most the
/// last `max_candles` valid rows in time order.
pub fn parse_candles(payload: &Value, max_candles: usize) -> Option<Vec<Candle>> {
    let rows = match payload {
        Value::Array(rows) => rows,
        Value::Object(obj) => field(obj, &["candles"])?.as_array()?,
        _ => return None,
    };
    let mut out: Vec<Candle> = rows
        .iter()
        .filter_map(|r| r.as_object())
        .filter_map(normalize_candle)
        .collect();
    out.sort_by_key(|c| c.time);
    out.dedup_by_key(|c| c.time);
    if out.len() > max_candles {
        out.drain(..out.len() - max_candles);
    }
    Some(out)
}
