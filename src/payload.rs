use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::json_util::{field, field_f64, field_str};
use crate::symbol::normalize_symbol;
use crate::types::{InstrumentLevels, QuoteUpdate};

pub const LAST_KEYS: [&str; 4] = ["last", "lastPrice", "price", "close"];
pub const BID_KEYS: [&str; 2] = ["bid", "bidPrice"];
pub const ASK_KEYS: [&str; 2] = ["ask", "askPrice"];
pub const VOLUME_KEYS: [&str; 2] = ["volume", "vol"];
pub const SYMBOL_KEYS: [&str; 4] = ["symbol", "instrument", "sym", "s"];

pub fn quote_from_obj(obj: &Map<String, Value>) -> QuoteUpdate {
    QuoteUpdate {
        last: field_f64(obj, &LAST_KEYS),
        bid: field_f64(obj, &BID_KEYS),
        ask: field_f64(obj, &ASK_KEYS),
        volume: field_f64(obj, &VOLUME_KEYS),
    }
}

/// Quotes arrive keyed by symbol, as an array of `{symbol, ..}` rows, or wrapped in
/// `{"quotes": ..}`. Keys are normalized to root symbols.
pub fn normalize_quotes(payload: &Value) -> HashMap<String, QuoteUpdate> {
    let mut out = HashMap::new();
    match payload {
        Value::Object(obj) => {
            if let Some(inner) = field(obj, &["quotes"]) {
                return normalize_quotes(inner);
            }
            for (key, v) in obj {
                let Some(row) = v.as_object() else {
                    continue;
                };
                insert_quote(&mut out, key, row);
            }
        }
        Value::Array(rows) => {
            for row in rows.iter().filter_map(|r| r.as_object()) {
                let Some(sym) = field_str(row, &SYMBOL_KEYS) else {
                    continue;
                };
                insert_quote(&mut out, sym, row);
            }
        }
        _ => {}
    }
    out
}

fn insert_quote(out: &mut HashMap<String, QuoteUpdate>, raw_symbol: &str, row: &Map<String, Value>) {
    let symbol = normalize_symbol(raw_symbol);
    if symbol.is_empty() {
        return;
    }
    let update = quote_from_obj(row);
    if update.is_empty() {
        return;
    }
    out.insert(symbol, update);
}

/// Decode `{"instruments": [{symbol, pdh, pdl, pdc, last?, bid?, ask?}]}`.
///
/// Rows without finite prior-day levels are skipped. Returns `None` when the payload has
/// no instrument list at all, so an error body does not wipe the current levels.
pub fn parse_levels(payload: &Value) -> Option<Vec<InstrumentLevels>> {
    let rows = match payload {
        Value::Array(rows) => rows,
        Value::Object(obj) => field(obj, &["instruments", "levels"])?.as_array()?,
        _ => return None,
    };
    let mut out: Vec<InstrumentLevels> = Vec::with_capacity(rows.len());
    for row in rows.iter().filter_map(|r| r.as_object()) {
        let Some(symbol) = field_str(row, &SYMBOL_KEYS).map(normalize_symbol) else {
            continue;
        };
        if symbol.is_empty() {
            continue;
        }
        let (Some(pdh), Some(pdl), Some(pdc)) = (
            field_f64(row, &["pdh"]),
            field_f64(row, &["pdl"]),
            field_f64(row, &["pdc"]),
        ) else {
            continue;
        };
        let level = InstrumentLevels {
            symbol,
            pdh,
            pdl,
            pdc,
            last: field_f64(row, &LAST_KEYS),
            bid: field_f64(row, &BID_KEYS),
            ask: field_f64(row, &ASK_KEYS),
        };
        match out.iter_mut().find(|l| l.symbol == level.symbol) {
            Some(existing) => *existing = level,
            None => out.push(level),
        }
    }
    Some(out)
}

/// Opaque endpoints still carry `{"error": ..}` bodies when the bridge behind the
/// dashboard is down; those must not replace good data.
pub fn is_error_body(payload: &Value) -> bool {
    payload
        .as_object()
        .is_some_and(|obj| obj.len() == 1 && obj.contains_key("error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quotes_dict_keyed_by_symbol() {
        let q = normalize_quotes(&json!({"ES": {"last": 5000}, "NQ": {"last": 20000}}));
        assert_eq!(q["ES"].last, Some(5000.0));
        assert_eq!(q["NQ"].last, Some(20000.0));
    }

    #[test]
    fn quotes_array_and_wrapped_forms() {
        let q = normalize_quotes(&json!([{"symbol": "ES", "last": 5000}, {"Symbol": "nq", "Bid": 1}]));
        assert!(q.contains_key("ES"));
        assert_eq!(q["NQ"].bid, Some(1.0));

        let q = normalize_quotes(&json!({"quotes": [{"symbol": "ES", "last": 5000}]}));
        assert!(q.contains_key("ES"));
    }

    #[test]
    fn quotes_strip_contract_from_keys_and_skip_junk() {
        let q = normalize_quotes(&json!({"ES 03-26": {"last": 5000}, "error": "bridge unreachable"}));
        assert_eq!(q.len(), 1);
        assert!(q.contains_key("ES"));
        assert!(normalize_quotes(&Value::Null).is_empty());
    }

    #[test]
    fn levels_skip_malformed_rows() {
        let v = json!({"instruments": [
            {"symbol": "ES", "pdh": 5200, "pdl": 5100, "pdc": 5150, "last": 5160},
            {"symbol": "NQ", "pdh": "nan", "pdl": 1, "pdc": 1},
            {"pdh": 1, "pdl": 1, "pdc": 1}
        ]});
        let levels = parse_levels(&v).expect("levels");
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].symbol, "ES");
        assert_eq!(levels[0].last, Some(5160.0));
        assert_eq!(levels[0].bid, None);

        assert!(parse_levels(&json!({"error": "x"})).is_none());
        assert_eq!(parse_levels(&json!({"instruments": []})), Some(vec![]));
    }

    #[test]
    fn error_body_detection() {
        assert!(is_error_body(&json!({"error": "bridge unreachable"})));
        assert!(!is_error_body(&json!({"error": "x", "positions": []})));
        assert!(!is_error_body(&json!([])));
    }
}
