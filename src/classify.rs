//! Push frame decoding and routing.
//!
//! Every inbound frame is decoded once into a canonical [`PushEvent`]; the engine only
//! ever sees these variants, never raw JSON.

use serde_json::{Map, Value};

use crate::json_util::field_str;
use crate::payload::{quote_from_obj, SYMBOL_KEYS};
use crate::symbol::normalize_symbol;
use crate::types::{Channel, QuoteUpdate};

const TYPE_KEYS: [&str; 5] = ["type", "event", "eventType", "event_type", "kind"];

const TICK_TYPES: [&str; 7] = ["quote", "price", "tick", "last", "marketdata", "bbo", "level1"];
const POSITION_TYPES: [&str; 5] = [
    "position",
    "positions",
    "positionupdate",
    "account",
    "accountupdate",
];
const ORDER_TYPES: [&str; 8] = [
    "order",
    "orders",
    "orderupdate",
    "execution",
    "executions",
    "fill",
    "filled",
    "trade",
];

#[derive(Clone, Debug, PartialEq)]
pub enum PushEvent {
    /// Price update for one instrument, already symbol-normalized.
    Tick { symbol: String, quote: QuoteUpdate },
    PositionEvent,
    OrderEvent,
    /// Carries the raw discriminator (empty when the frame had none).
    Unknown { kind: String },
}

/// What the engine should do with an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    MergeQuote,
    Refresh(Channel),
    Drop,
}

impl PushEvent {
    pub fn route(&self, refresh_on_unknown: bool) -> Route {
        match self {
            PushEvent::Tick { .. } => Route::MergeQuote,
            PushEvent::PositionEvent | PushEvent::OrderEvent => Route::Refresh(Channel::Fast),
            PushEvent::Unknown { .. } if refresh_on_unknown => Route::Refresh(Channel::Slow),
            PushEvent::Unknown { .. } => Route::Drop,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            PushEvent::Tick { .. } => "tick",
            PushEvent::PositionEvent => "position",
            PushEvent::OrderEvent => "order",
            PushEvent::Unknown { kind } => kind,
        }
    }
}

/// Decode one text frame. Frames may carry a single object or an array of objects.
///
/// Returns an empty vec for malformed frames: non-JSON text, scalars, and tick frames
/// without a symbol or without any price field.
pub fn decode_frame(txt: &str) -> Vec<PushEvent> {
    let v: Value = match serde_json::from_str(txt) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    match v {
        Value::Object(obj) => classify(&obj).into_iter().collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_object())
            .filter_map(classify)
            .collect(),
        _ => Vec::new(),
    }
}

pub fn classify(obj: &Map<String, Value>) -> Option<PushEvent> {
    let raw_kind = field_str(obj, &TYPE_KEYS).unwrap_or("");
    let kind = canonical_kind(raw_kind);

    if TICK_TYPES.contains(&kind.as_str()) {
        let symbol = normalize_symbol(field_str(obj, &SYMBOL_KEYS)?);
        if symbol.is_empty() {
            return None;
        }
        let quote = quote_from_obj(obj);
        if quote.is_empty() {
            return None;
        }
        return Some(PushEvent::Tick { symbol, quote });
    }
    if POSITION_TYPES.contains(&kind.as_str()) {
        return Some(PushEvent::PositionEvent);
    }
    if ORDER_TYPES.contains(&kind.as_str()) {
        return Some(PushEvent::OrderEvent);
    }
    Some(PushEvent::Unknown {
        kind: raw_kind.to_string(),
    })
}

/// `"Position_Update"`, `"position-update"` and `"PositionUpdate"` all compare equal.
fn canonical_kind(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(txt: &str) -> Option<PushEvent> {
        let mut v = decode_frame(txt);
        assert!(v.len() <= 1, "expected at most one event, got {v:?}");
        v.pop()
    }

    #[test]
    fn quote_frame_becomes_tick_with_root_symbol() {
        let ev = one(r#"{"type":"quote","symbol":"ES 06-26","last":5123.25}"#);
        assert_eq!(
            ev,
            Some(PushEvent::Tick {
                symbol: "ES".to_string(),
                quote: QuoteUpdate {
                    last: Some(5123.25),
                    ..QuoteUpdate::default()
                },
            })
        );
    }

    #[test]
    fn discriminator_tolerates_casing_and_synonyms() {
        let ev = one(r#"{"Type":"Price","Symbol":"nq 06-26","Last":"20100.5","Bid":20100}"#);
        match ev {
            Some(PushEvent::Tick { symbol, quote }) => {
                assert_eq!(symbol, "NQ");
                assert_eq!(quote.last, Some(20100.5));
                assert_eq!(quote.bid, Some(20100.0));
                assert_eq!(quote.ask, None);
            }
            other => panic!("expected tick, got {other:?}"),
        }
        assert_eq!(one(r#"{"type":"Position_Update"}"#), Some(PushEvent::PositionEvent));
        assert_eq!(one(r#"{"event":"execution"}"#), Some(PushEvent::OrderEvent));
        assert_eq!(one(r#"{"type":"ORDER-UPDATE"}"#), Some(PushEvent::OrderEvent));
    }

    #[test]
    fn malformed_frames_are_dropped() {
        assert_eq!(one("not json"), None);
        assert_eq!(one("42"), None);
        assert_eq!(one(r#"{"type":"quote","last":1}"#), None);
        assert_eq!(one(r#"{"type":"quote","symbol":"ES"}"#), None);
        assert_eq!(one(r#"{"type":"quote","symbol":"ES","last":"nan"}"#), None);
    }

    #[test]
    fn unrecognised_types_fall_back_to_unknown() {
        assert_eq!(
            one(r#"{"type":"heartbeat"}"#),
            Some(PushEvent::Unknown {
                kind: "heartbeat".to_string()
            })
        );
        assert_eq!(
            one(r#"{"symbol":"ES"}"#),
            Some(PushEvent::Unknown {
                kind: String::new()
            })
        );
    }

    #[test]
    fn routes_follow_event_kind() {
        let tick = PushEvent::Tick {
            symbol: "ES".to_string(),
            quote: QuoteUpdate::default(),
        };
        let unknown = PushEvent::Unknown {
            kind: "x".to_string(),
        };
        assert_eq!(tick.route(true), Route::MergeQuote);
        assert_eq!(PushEvent::PositionEvent.route(true), Route::Refresh(Channel::Fast));
        assert_eq!(PushEvent::OrderEvent.route(false), Route::Refresh(Channel::Fast));
        assert_eq!(unknown.route(true), Route::Refresh(Channel::Slow));
        assert_eq!(unknown.route(false), Route::Drop);
    }

    #[test]
    fn array_frames_yield_one_event_per_object() {
        let evs = decode_frame(r#"[{"type":"fill"},{"type":"quote","symbol":"CL","bid":70.1},7]"#);
        assert_eq!(evs.len(), 2);
        assert_eq!(evs[0], PushEvent::OrderEvent);
        assert_eq!(evs[1].kind(), "tick");
    }
}
