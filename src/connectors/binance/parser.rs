//! Binance ticker frame parsing
//!
//! Accepts combined-stream envelopes (`{"stream": .., "data": {..}}`) and raw
//! single-stream payloads, and pulls one price out of a ticker payload.

use serde_json::{json, Value};

use crate::types::market_data::PriceTick;

/// Fields tried in order: best ask, best bid, last price, generic price.
const PRICE_FIELDS: [&str; 5] = ["a", "b", "c", "p", "price"];
const SYMBOL_FIELDS: [&str; 2] = ["s", "symbol"];

/// Parse one text frame. `None` for anything that does not yield a symbol and
/// a finite price; such frames are simply dropped by the caller.
pub fn parse_ticker_message(text: &str) -> Option<PriceTick> {
    let message: Value = serde_json::from_str(text).ok()?;
    let payload = match message.get("data") {
        Some(data) if is_truthy(data) => data,
        _ => &message,
    };
    extract_price_tick(payload)
}

/// Pull `(symbol, price)` out of a ticker payload.
pub fn extract_price_tick(payload: &Value) -> Option<PriceTick> {
    let symbol = SYMBOL_FIELDS
        .iter()
        .filter_map(|field| payload.get(*field).and_then(|s| s.as_str()))
        .find(|s| !s.is_empty())?;

    // The first present field decides; a non-numeric value there does not
    // fall through to the next one.
    let raw = PRICE_FIELDS
        .iter()
        .filter_map(|field| payload.get(*field))
        .find(|v| is_truthy(v))?;
    let price = numeric_value(raw)?;

    Some(PriceTick {
        symbol: normalize_symbol(symbol),
        price,
    })
}

/// Trim and uppercase a trading symbol.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Longest symbol accepted into a stream name.
pub const MAX_SYMBOL_LEN: usize = 20;

/// A normalized symbol is 1 to 20 ASCII uppercase letters or digits.
///
/// Anything else would end up verbatim in the connection URL and break every
/// reconnect.
pub fn is_valid_symbol(normalized: &str) -> bool {
    !normalized.is_empty()
        && normalized.len() <= MAX_SYMBOL_LEN
        && normalized
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// `<symbol lowercase>@bookTicker`, or `None` unless the normalized symbol is valid.
pub fn stream_name_for_symbol(symbol: &str) -> Option<String> {
    let normalized = normalize_symbol(symbol);
    if !is_valid_symbol(&normalized) {
        return None;
    }
    Some(format!(
        "{}{}",
        normalized.to_lowercase(),
        super::config::BOOK_TICKER_STREAM_SUFFIX
    ))
}

/// `SUBSCRIBE` / `UNSUBSCRIBE` control frame.
pub fn create_control_message(method: &str, streams: &[String], id: i64) -> String {
    json!({
        "method": method,
        "params": streams,
        "id": id,
    })
    .to_string()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}
