//! Tolerant lookups over bridge JSON. The bridge mixes `last`/`Last`/`lastPrice` style
//! keys and sends numbers either as JSON numbers or numeric strings; everything that
//! touches raw payload shape goes through here.

use serde_json::{Map, Value};

/// Parse a JSON number or numeric string. Non-finite values are rejected.
pub fn parse_f64(v: Option<&Value>) -> Option<f64> {
    let v = v?;
    let n = if let Some(s) = v.as_str() {
        s.trim().parse::<f64>().ok()?
    } else {
        v.as_f64()?
    };
    n.is_finite().then_some(n)
}

/// Parse an integer timestamp, accepting floats and numeric strings.
pub fn parse_i64(v: Option<&Value>) -> Option<i64> {
    let v = v?;
    if let Some(i) = v.as_i64() {
        return Some(i);
    }
    parse_f64(Some(v)).map(|f| f as i64)
}

/// First value whose key matches one of `names`, compared case-insensitively.
pub fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    for name in names {
        if let Some(v) = obj.get(*name) {
            if !v.is_null() {
                return Some(v);
            }
        }
    }
    obj.iter()
        .find(|(k, v)| !v.is_null() && names.iter().any(|n| k.eq_ignore_ascii_case(n)))
        .map(|(_, v)| v)
}

pub fn field_f64(obj: &Map<String, Value>, names: &[&str]) -> Option<f64> {
    parse_f64(field(obj, names))
}

pub fn field_str<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a str> {
    field(obj, names).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_f64_rejects_non_finite() {
        assert_eq!(parse_f64(Some(&json!("nan"))), None);
        assert_eq!(parse_f64(Some(&json!("inf"))), None);
        assert_eq!(parse_f64(Some(&json!("-inf"))), None);
        assert_eq!(parse_f64(Some(&json!("abc"))), None);
        assert_eq!(parse_f64(Some(&json!("123.45"))), Some(123.45));
        assert_eq!(parse_f64(Some(&json!(99))), Some(99.0));
        assert_eq!(parse_f64(Some(&Value::Null)), None);
        assert_eq!(parse_f64(None), None);
    }

    #[test]
    fn field_lookup_ignores_case_and_nulls() {
        let v = json!({"Last": 5000.25, "bid": null, "BID": 4999.75});
        let obj = v.as_object().unwrap();
        assert_eq!(field_f64(obj, &["last"]), Some(5000.25));
        assert_eq!(field_f64(obj, &["bid"]), Some(4999.75));
        assert_eq!(field_f64(obj, &["ask", "askPrice"]), None);
    }

    #[test]
    fn parse_i64_accepts_strings_and_floats() {
        assert_eq!(parse_i64(Some(&json!(100))), Some(100));
        assert_eq!(parse_i64(Some(&json!(100.0))), Some(100));
        assert_eq!(parse_i64(Some(&json!("100"))), Some(100));
        assert_eq!(parse_i64(Some(&json!("x"))), None);
    }
}
