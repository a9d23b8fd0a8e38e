use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Logical refresh groups polled from the bridge.
///
/// - `Fast`: status, account, positions, quotes.
/// - `Slow`: levels, trades, signals, swing points and the active chart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Fast,
    Slow,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Fast, Channel::Slow];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Fast => "fast",
            Channel::Slow => "slow",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chart timeframes the bridge aggregates candles for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
}

impl Timeframe {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "1m" => Some(Self::M1),
            "5m" => Some(Self::M5),
            "15m" => Some(Self::M15),
            "1h" => Some(Self::H1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial quote as delivered by a push tick or one entry of the quotes endpoint.
/// `None` means "not supplied", never "cleared".
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QuoteUpdate {
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<f64>,
}

impl QuoteUpdate {
    pub fn is_empty(&self) -> bool {
        self.last.is_none() && self.bid.is_none() && self.ask.is_none() && self.volume.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SymbolQuote {
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<f64>,
    pub updated_ms: u64,
}

impl SymbolQuote {
    /// Field-wise merge. Returns true when any field changed.
    pub fn merge(&mut self, update: &QuoteUpdate, now_ms: u64) -> bool {
        let mut changed = false;
        for (slot, incoming) in [
            (&mut self.last, update.last),
            (&mut self.bid, update.bid),
            (&mut self.ask, update.ask),
            (&mut self.volume, update.volume),
        ] {
            if let Some(v) = incoming {
                if *slot != Some(v) {
                    *slot = Some(v);
                    changed = true;
                }
            }
        }
        if changed {
            self.updated_ms = now_ms;
        }
        changed
    }
}

/// Prior-day reference levels for one instrument plus its last known prices.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InstrumentLevels {
    pub symbol: String,
    pub pdh: f64,
    pub pdl: f64,
    pub pdc: f64,
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

pub fn now_ms() -> u64 {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    d.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_parse_is_strict() {
        assert_eq!(Timeframe::parse("5m"), Some(Timeframe::M5));
        assert_eq!(Timeframe::parse("1h"), Some(Timeframe::H1));
        assert_eq!(Timeframe::parse("30s"), None);
        assert_eq!(Timeframe::parse("5M"), None);
    }

    #[test]
    fn quote_merge_keeps_absent_fields() {
        let mut q = SymbolQuote::default();
        assert!(q.merge(
            &QuoteUpdate {
                last: Some(100.0),
                bid: Some(99.75),
                ..QuoteUpdate::default()
            },
            1
        ));
        assert!(q.merge(
            &QuoteUpdate {
                ask: Some(100.25),
                ..QuoteUpdate::default()
            },
            2
        ));
        assert_eq!(q.last, Some(100.0));
        assert_eq!(q.bid, Some(99.75));
        assert_eq!(q.ask, Some(100.25));
        assert_eq!(q.updated_ms, 2);
    }

    #[test]
    fn quote_merge_reports_no_change_for_same_values() {
        let mut q = SymbolQuote::default();
        let u = QuoteUpdate {
            last: Some(1.0),
            ..QuoteUpdate::default()
        };
        assert!(q.merge(&u, 1));
        assert!(!q.merge(&u, 2));
        assert_eq!(q.updated_ms, 1);
    }
}
