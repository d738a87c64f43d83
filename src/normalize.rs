use serde_json::Value;

use crate::types::{NormalizedMarket, Platform, Rejection};

/// Map a raw platform payload into the shared Market schema.
///
/// Pure and total: every input yields either a normalized record or a
/// rejection reason. Missing natural identifiers reject; every other absent
/// field defaults to None/empty.
pub fn normalize(platform: Platform, raw: &Value) -> Result<NormalizedMarket, Rejection> {
    match platform {
        Platform::Kalshi => normalize_kalshi(raw),
        Platform::Polymarket => normalize_polymarket(raw),
    }
}

/// Kalshi quotes prices in integer cents (0–100). The implied YES
/// probability is the bid/ask midpoint mapped into [0,1].
pub fn normalize_kalshi(raw: &Value) -> Result<NormalizedMarket, Rejection> {
    let external_id = raw
        .get("ticker")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .ok_or(Rejection::MissingExternalId)?
        .to_string();

    let yes_bid = raw.get("yes_bid").and_then(value_as_f64);
    let yes_ask = raw.get("yes_ask").and_then(value_as_f64);
    let yes_price = match (yes_bid, yes_ask) {
        (Some(bid), Some(ask)) => Some((bid + ask) / 200.0),
        _ => None,
    };

    Ok(NormalizedMarket {
        platform: Platform::Kalshi,
        external_id,
        title: str_field(raw, "title"),
        category: opt_str_field(raw, "category"),
        close_time: opt_str_field(raw, "close_time"),
        yes_price,
        volume: raw.get("volume").and_then(value_as_f64),
        is_open: raw.get("status").and_then(|s| s.as_str()) == Some("open"),
    })
}

/// Polymarket identifies markets by conditionId (falling back to id) and
/// reports outcome prices as decimal strings, sometimes inside a
/// string-encoded JSON array. The first outcome is YES.
pub fn normalize_polymarket(raw: &Value) -> Result<NormalizedMarket, Rejection> {
    let external_id = raw
        .get("conditionId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .or_else(|| {
            raw.get("id").and_then(|v| {
                v.as_str()
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .or_else(|| v.as_i64().map(|n| n.to_string()))
            })
        })
        .ok_or(Rejection::MissingExternalId)?;

    let title = raw
        .get("question")
        .and_then(|q| q.as_str())
        .or_else(|| raw.get("title").and_then(|t| t.as_str()))
        .unwrap_or("")
        .to_string();

    let yes_price = first_outcome_price(raw)?;

    Ok(NormalizedMarket {
        platform: Platform::Polymarket,
        external_id,
        title,
        category: opt_str_field(raw, "category"),
        close_time: opt_str_field(raw, "endDate"),
        yes_price,
        volume: raw.get("volume").and_then(value_as_f64),
        is_open: raw.get("active").and_then(|a| a.as_bool()).unwrap_or(false),
    })
}

/// Extract the first element of `outcomePrices` as a float. The field may be
/// a JSON array or a string holding a JSON array; absent means no price,
/// present-but-unparseable rejects.
fn first_outcome_price(raw: &Value) -> Result<Option<f64>, Rejection> {
    let Some(field) = raw.get("outcomePrices") else {
        return Ok(None);
    };

    let parsed;
    let prices = match field {
        Value::Array(items) => items.as_slice(),
        Value::String(s) => {
            parsed = serde_json::from_str::<Vec<Value>>(s)
                .map_err(|_| Rejection::UnparseablePrice(s.clone()))?;
            parsed.as_slice()
        }
        other => return Err(Rejection::UnparseablePrice(other.to_string())),
    };

    match prices.first() {
        None => Ok(None),
        Some(first) => value_as_f64(first)
            .map(Some)
            .ok_or_else(|| Rejection::UnparseablePrice(first.to_string())),
    }
}

/// Accept a number or a numeric string; upstream APIs use both.
fn value_as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn str_field(raw: &Value, key: &str) -> String {
    raw.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string()
}

fn opt_str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kalshi_cents_map_to_probability_midpoint() {
        let raw = json!({
            "ticker": "FED-24DEC-T4.75",
            "title": "Fed funds above 4.75?",
            "category": "Economics",
            "close_time": "2026-12-18T20:00:00Z",
            "yes_bid": 40,
            "yes_ask": 44,
            "volume": 12500,
            "status": "open"
        });
        let m = normalize_kalshi(&raw).unwrap();
        assert_eq!(m.external_id, "FED-24DEC-T4.75");
        assert!((m.yes_price.unwrap() - 0.42).abs() < 1e-9);
        assert!(m.is_open);
        assert_eq!(m.category.as_deref(), Some("Economics"));
    }

    #[test]
    fn kalshi_missing_ticker_rejects() {
        let raw = json!({"title": "no ticker", "yes_bid": 40, "yes_ask": 44});
        assert_eq!(normalize_kalshi(&raw), Err(Rejection::MissingExternalId));
    }

    #[test]
    fn kalshi_missing_quotes_leave_price_unset() {
        let raw = json!({"ticker": "T-1", "yes_bid": 40, "status": "closed"});
        let m = normalize_kalshi(&raw).unwrap();
        assert_eq!(m.yes_price, None);
        assert!(!m.is_open);
    }

    #[test]
    fn polymarket_parses_stringified_price_array() {
        let raw = json!({
            "conditionId": "0xabc123",
            "question": "Will BTC close above 100k?",
            "endDate": "2026-12-31T00:00:00Z",
            "outcomePrices": "[\"0.62\", \"0.38\"]",
            "volume": "90544.21",
            "active": true
        });
        let m = normalize_polymarket(&raw).unwrap();
        assert_eq!(m.external_id, "0xabc123");
        assert!((m.yes_price.unwrap() - 0.62).abs() < 1e-9);
        assert!((m.volume.unwrap() - 90544.21).abs() < 1e-9);
        assert!(m.is_open);
    }

    #[test]
    fn polymarket_falls_back_to_numeric_id() {
        let raw = json!({"id": 51423, "question": "q", "outcomePrices": ["0.5", "0.5"]});
        let m = normalize_polymarket(&raw).unwrap();
        assert_eq!(m.external_id, "51423");
        assert!(!m.is_open);
    }

    #[test]
    fn polymarket_garbage_price_rejects() {
        let raw = json!({"conditionId": "0xdef", "outcomePrices": "[\"sixty-two\"]"});
        match normalize_polymarket(&raw) {
            Err(Rejection::UnparseablePrice(_)) => {}
            other => panic!("expected price rejection, got {other:?}"),
        }
    }

    #[test]
    fn polymarket_absent_prices_default_to_none() {
        let raw = json!({"conditionId": "0xdef", "question": "q"});
        let m = normalize_polymarket(&raw).unwrap();
        assert_eq!(m.yes_price, None);
        assert_eq!(m.close_time, None);
        assert_eq!(m.category, None);
    }

    #[test]
    fn polymarket_missing_both_ids_rejects() {
        let raw = json!({"question": "who am i"});
        assert_eq!(normalize_polymarket(&raw), Err(Rejection::MissingExternalId));
    }
}
