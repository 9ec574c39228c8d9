use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::models::Direction;

/// Fixed-shape market record every downstream consumer works with. Raw
/// Gamma API payloads are normalized into this exactly once, before any
/// sizing or risk logic runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRecord {
    pub market_id: String,
    pub question: String,
    /// YES token price (0.0–1.0).
    pub yes_price: f64,
    /// NO token price (0.0–1.0).
    pub no_price: f64,
    /// Trailing 24h traded volume in USD, when the API reports one.
    #[serde(default)]
    pub volume_24h: Option<f64>,
    #[serde(default)]
    pub resolved: bool,
    /// Final outcome, once the market has settled.
    #[serde(default)]
    pub outcome: Option<Direction>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl MarketRecord {
    pub fn price_for(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Yes => self.yes_price,
            Direction::No => self.no_price,
        }
    }
}

/// A market settling to its final outcome, as persisted in the daily
/// resolutions snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionEvent {
    pub market_id: String,
    pub outcome: Direction,
    pub resolved_at: DateTime<Utc>,
}

/// Normalize one raw market JSON object into a `MarketRecord`.
///
/// The Gamma API is inconsistent about shapes: prices may arrive as direct
/// `yes_price`/`no_price` fields, as parallel `outcomes`/`outcomePrices`
/// arrays, or as stringified lists inside those fields. Markets missing an
/// id or a usable YES/NO price pair are dropped (`None`), not guessed at.
pub fn normalize_market(raw: &Value) -> Option<MarketRecord> {
    let market_id = extract_market_id(raw)?;
    let (yes_price, no_price) = extract_yes_no_prices(raw)?;
    let question = raw
        .get("question")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let volume_24h = ["volume24hr", "volume24hrClob", "volume_24h", "volume"]
        .iter()
        .find_map(|key| raw.get(key).and_then(value_to_f64));
    let outcome = extract_outcome(raw);
    let end_date = ["endDate", "end_date", "end"]
        .iter()
        .find_map(|key| raw.get(key).and_then(Value::as_str))
        .map(str::to_string);

    Some(MarketRecord {
        market_id,
        question,
        yes_price,
        no_price,
        volume_24h,
        resolved: outcome.is_some(),
        outcome,
        end_date,
    })
}

/// Detect whether a raw market payload carries a final YES/NO outcome,
/// returning the resolution event to persist and settle against.
pub fn detect_resolution(raw: &Value) -> Option<ResolutionEvent> {
    let outcome = extract_outcome(raw)?;
    let market_id = extract_market_id(raw)?;
    Some(ResolutionEvent {
        market_id,
        outcome,
        resolved_at: Utc::now(),
    })
}

fn extract_market_id(raw: &Value) -> Option<String> {
    for key in ["market_id", "id", "conditionId"] {
        match raw.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accept a JSON array directly, or a stringified list (the API sometimes
/// ships `"[\"Yes\", \"No\"]"`, occasionally with single quotes).
fn value_to_list(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(s)
                .or_else(|_| serde_json::from_str(&s.replace('\'', "\"")))
                .ok()?;
            match parsed {
                Value::Array(items) => Some(items),
                _ => None,
            }
        }
        _ => None,
    }
}

fn extract_yes_no_prices(raw: &Value) -> Option<(f64, f64)> {
    let yes = raw.get("yes_price").and_then(value_to_f64);
    let no = raw.get("no_price").and_then(value_to_f64);
    if let (Some(yes), Some(no)) = (yes, no) {
        return Some((yes, no));
    }

    let outcomes = ["outcomes", "outcome", "outcome_labels"]
        .iter()
        .find_map(|key| raw.get(key).and_then(value_to_list))?;
    let prices = ["outcomePrices", "outcome_prices", "outcomePrice"]
        .iter()
        .find_map(|key| raw.get(key).and_then(value_to_list))?;

    let mut yes_price = None;
    let mut no_price = None;
    for (outcome, price) in outcomes.iter().zip(prices.iter()) {
        let Some(label) = outcome.as_str() else {
            continue;
        };
        let Some(price) = value_to_f64(price) else {
            continue;
        };
        match label.trim().to_lowercase().as_str() {
            "yes" | "y" => yes_price = Some(price),
            "no" | "n" => no_price = Some(price),
            _ => {}
        }
    }

    match (yes_price, no_price) {
        (Some(yes), Some(no)) => Some((yes, no)),
        _ => None,
    }
}

fn normalize_outcome_value(value: &Value) -> Option<Direction> {
    match value {
        Value::String(s) => Direction::from_str(s).ok(),
        Value::Array(items) if items.len() == 1 => normalize_outcome_value(&items[0]),
        Value::Object(map) => ["name", "label", "outcome"]
            .iter()
            .find_map(|key| map.get(*key).and_then(normalize_outcome_value)),
        _ => None,
    }
}

fn extract_outcome(raw: &Value) -> Option<Direction> {
    [
        "outcome",
        "winningOutcome",
        "resolvedOutcome",
        "result",
        "resolution",
    ]
    .iter()
    .find_map(|key| raw.get(key).and_then(normalize_outcome_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn test_normalize_direct_fields() {
        let raw = json!({
            "market_id": "m1",
            "question": "Will X happen?",
            "yes_price": 0.62,
            "no_price": 0.38,
            "volume24hr": 12500.0,
        });
        let record = normalize_market(&raw).unwrap();
        assert_eq!(record.market_id, "m1");
        assert_relative_eq!(record.yes_price, 0.62, epsilon = 1e-9);
        assert_relative_eq!(record.no_price, 0.38, epsilon = 1e-9);
        assert_relative_eq!(record.volume_24h.unwrap(), 12500.0, epsilon = 1e-9);
        assert!(!record.resolved);
    }

    #[test]
    fn test_normalize_parallel_arrays() {
        let raw = json!({
            "id": 4217,
            "question": "Will Y happen?",
            "outcomes": ["Yes", "No"],
            "outcomePrices": ["0.41", "0.59"],
        });
        let record = normalize_market(&raw).unwrap();
        assert_eq!(record.market_id, "4217");
        assert_relative_eq!(record.yes_price, 0.41, epsilon = 1e-9);
        assert_relative_eq!(record.no_price, 0.59, epsilon = 1e-9);
    }

    #[test]
    fn test_normalize_stringified_lists() {
        let raw = json!({
            "id": "m3",
            "question": "Q",
            "outcomes": "[\"Yes\", \"No\"]",
            "outcomePrices": "[0.7, 0.3]",
        });
        let record = normalize_market(&raw).unwrap();
        assert_relative_eq!(record.yes_price, 0.7, epsilon = 1e-9);
        assert_relative_eq!(record.no_price, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_normalize_single_quoted_lists() {
        let raw = json!({
            "id": "m4",
            "question": "Q",
            "outcomes": "['Yes', 'No']",
            "outcome_prices": "['0.25', '0.75']",
        });
        let record = normalize_market(&raw).unwrap();
        assert_relative_eq!(record.yes_price, 0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_normalize_drops_unusable_markets() {
        assert!(normalize_market(&json!({"question": "no id", "yes_price": 0.5, "no_price": 0.5})).is_none());
        assert!(normalize_market(&json!({"id": "m5", "question": "no prices"})).is_none());
        assert!(normalize_market(&json!({
            "id": "m6",
            "outcomes": ["Up", "Down"],
            "outcomePrices": [0.5, 0.5],
        }))
        .is_none());
    }

    #[test]
    fn test_outcome_extraction_variants() {
        let plain = json!({"id": "m1", "yes_price": 0.9, "no_price": 0.1, "outcome": "yes"});
        assert_eq!(
            normalize_market(&plain).unwrap().outcome,
            Some(Direction::Yes)
        );

        let nested = json!({"id": "m2", "yes_price": 0.1, "no_price": 0.9,
                            "winningOutcome": {"name": "No"}});
        assert_eq!(
            normalize_market(&nested).unwrap().outcome,
            Some(Direction::No)
        );

        let listed = json!({"id": "m3", "yes_price": 0.9, "no_price": 0.1,
                            "resolvedOutcome": ["YES"]});
        assert_eq!(
            normalize_market(&listed).unwrap().outcome,
            Some(Direction::Yes)
        );

        let ambiguous = json!({"id": "m4", "yes_price": 0.5, "no_price": 0.5,
                               "result": ["YES", "NO"]});
        assert_eq!(normalize_market(&ambiguous).unwrap().outcome, None);
    }

    #[test]
    fn test_detect_resolution() {
        let raw = json!({"id": "m1", "resolvedOutcome": "No"});
        let event = detect_resolution(&raw).unwrap();
        assert_eq!(event.market_id, "m1");
        assert_eq!(event.outcome, Direction::No);

        assert!(detect_resolution(&json!({"id": "m2"})).is_none());
    }
}
