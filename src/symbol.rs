/// Reduce a bridge instrument name to its root symbol.
///
/// Futures contracts arrive as `"ES 03-26"`, `"ES03-26"` or lower-cased variants; quote
/// state must stay keyed by the root (`"ES"`) across contract rolls.
pub fn normalize_symbol(raw: &str) -> String {
    let head = raw.split_whitespace().next().unwrap_or("");
    strip_contract_suffix(head).trim().to_ascii_uppercase()
}

/// Strip a trailing `MM-YY` expiry, e.g. `ES03-26` -> `ES`.
fn strip_contract_suffix(s: &str) -> &str {
    let b = s.as_bytes();
    if b.len() < 5 {
        return s;
    }
    let tail = &b[b.len() - 5..];
    let is_expiry = tail[0].is_ascii_digit()
        && tail[1].is_ascii_digit()
        && tail[2] == b'-'
        && tail[3].is_ascii_digit()
        && tail[4].is_ascii_digit();
    if is_expiry {
        &s[..s.len() - 5]
    } else {
        s
    }
}
