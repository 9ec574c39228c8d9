use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::marketdata::{MarketRecord, ResolutionEvent};
use crate::news::NewsArticle;

/// Writes the daily market and resolution snapshots the backtester replays.
///
/// Market snapshots are write-once per day: the first tick that sees the
/// day's markets freezes them, so intraday price drift cannot leak into a
/// later replay. Resolutions accumulate across ticks instead, deduplicated
/// by (market id, outcome).
pub struct MarketSnapshotter {
    market_dir: PathBuf,
    resolution_dir: PathBuf,
}

impl MarketSnapshotter {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base = base_dir.as_ref();
        let market_dir = base.join("markets");
        let resolution_dir = base.join("resolutions");
        fs::create_dir_all(&market_dir).context("Failed to create markets snapshot dir")?;
        fs::create_dir_all(&resolution_dir)
            .context("Failed to create resolutions snapshot dir")?;
        Ok(MarketSnapshotter {
            market_dir,
            resolution_dir,
        })
    }

    /// Write the day's market snapshot. Returns false without touching the
    /// file if one already exists for this date.
    pub fn record_daily_snapshot(
        &self,
        markets: &[MarketRecord],
        day: NaiveDate,
    ) -> Result<bool> {
        let path = self.market_dir.join(format!("{}.json", day));
        if path.exists() {
            debug!("Market snapshot for {} already exists, skipping", day);
            return Ok(false);
        }
        let payload = json!({
            "date": day.to_string(),
            "markets": markets,
        });
        write_json(&path, &payload)?;
        Ok(true)
    }

    /// Append resolution events to the day's file, skipping any
    /// (market id, outcome) pair already recorded. Returns whether anything
    /// new was written.
    pub fn record_resolutions(
        &self,
        resolutions: &[ResolutionEvent],
        day: NaiveDate,
    ) -> Result<bool> {
        if resolutions.is_empty() {
            return Ok(false);
        }
        let path = self.resolution_dir.join(format!("{}.json", day));
        let mut existing = read_array_field(&path, "resolutions");

        let mut seen: HashSet<(String, String)> = existing
            .iter()
            .map(|r| {
                (
                    string_field(r, "market_id"),
                    string_field(r, "outcome"),
                )
            })
            .collect();

        let mut added = false;
        for resolution in resolutions {
            let key = (
                resolution.market_id.clone(),
                resolution.outcome.to_string(),
            );
            if !seen.insert(key) {
                continue;
            }
            existing.push(serde_json::to_value(resolution)?);
            added = true;
        }
        if !added {
            return Ok(false);
        }

        let payload = json!({
            "date": day.to_string(),
            "resolutions": existing,
        });
        write_json(&path, &payload)?;
        Ok(true)
    }
}

/// Accumulates the day's news articles for replay, appending across ticks
/// and deduplicating by (url, headline).
pub struct NewsSnapshotter {
    news_dir: PathBuf,
}

impl NewsSnapshotter {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let news_dir = base_dir.as_ref().join("news");
        fs::create_dir_all(&news_dir).context("Failed to create news snapshot dir")?;
        Ok(NewsSnapshotter { news_dir })
    }

    /// Append articles not already in the day's file. Returns whether
    /// anything new was written.
    pub fn record_daily_snapshot(
        &self,
        articles: &[NewsArticle],
        day: NaiveDate,
    ) -> Result<bool> {
        if articles.is_empty() {
            return Ok(false);
        }
        let path = self.news_dir.join(format!("{}.json", day));
        let mut existing = read_array_field(&path, "articles");

        let mut seen: HashSet<(String, String)> = existing
            .iter()
            .map(|a| (string_field(a, "url"), string_field(a, "headline")))
            .collect();

        let mut added = false;
        for article in articles {
            let key = (article.url.clone(), article.headline.clone());
            if !seen.insert(key) {
                continue;
            }
            existing.push(serde_json::to_value(article)?);
            added = true;
        }
        if !added {
            return Ok(false);
        }

        let payload = json!({
            "date": day.to_string(),
            "articles": existing,
        });
        write_json(&path, &payload)?;
        Ok(true)
    }
}

fn write_json(path: &Path, payload: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(payload)?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Read an array field out of an existing snapshot file. A missing or
/// corrupt file yields an empty list so a bad snapshot never wedges the
/// loop.
fn read_array_field(path: &Path, field: &str) -> Vec<Value> {
    let Ok(text) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let Ok(doc) = serde_json::from_str::<Value>(&text) else {
        return Vec::new();
    };
    match doc.get(field) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::Utc;

    fn market(id: &str, yes: f64) -> MarketRecord {
        MarketRecord {
            market_id: id.into(),
            question: "Q".into(),
            yes_price: yes,
            no_price: 1.0 - yes,
            volume_24h: None,
            resolved: false,
            outcome: None,
            end_date: None,
        }
    }

    fn article(url: &str, headline: &str) -> NewsArticle {
        NewsArticle {
            headline: headline.into(),
            summary: "s".into(),
            source: "t".into(),
            url: url.into(),
            published_at: Utc::now(),
            category: None,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[test]
    fn test_market_snapshot_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let snap = MarketSnapshotter::new(dir.path()).unwrap();

        assert!(snap.record_daily_snapshot(&[market("m1", 0.6)], day()).unwrap());
        // Second write with different data must not replace the first.
        assert!(!snap.record_daily_snapshot(&[market("m1", 0.9)], day()).unwrap());

        let text =
            fs::read_to_string(dir.path().join("markets").join("2025-06-01.json")).unwrap();
        let doc: Value = serde_json::from_str(&text).unwrap();
        let markets = doc["markets"].as_array().unwrap();
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0]["yes_price"].as_f64().unwrap(), 0.6);
    }

    #[test]
    fn test_resolutions_append_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let snap = MarketSnapshotter::new(dir.path()).unwrap();
        let event = ResolutionEvent {
            market_id: "m1".into(),
            outcome: Direction::Yes,
            resolved_at: Utc::now(),
        };

        assert!(snap.record_resolutions(&[event.clone()], day()).unwrap());
        // Same (market_id, outcome) again is a no-op.
        assert!(!snap.record_resolutions(&[event.clone()], day()).unwrap());

        let other = ResolutionEvent {
            market_id: "m2".into(),
            outcome: Direction::No,
            resolved_at: Utc::now(),
        };
        assert!(snap.record_resolutions(&[other], day()).unwrap());

        let text = fs::read_to_string(
            dir.path().join("resolutions").join("2025-06-01.json"),
        )
        .unwrap();
        let doc: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["resolutions"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_resolutions_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let snap = MarketSnapshotter::new(dir.path()).unwrap();
        assert!(!snap.record_resolutions(&[], day()).unwrap());
        assert!(!dir.path().join("resolutions").join("2025-06-01.json").exists());
    }

    #[test]
    fn test_news_snapshot_appends_across_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let snap = NewsSnapshotter::new(dir.path()).unwrap();

        assert!(snap
            .record_daily_snapshot(&[article("u1", "First")], day())
            .unwrap());
        assert!(snap
            .record_daily_snapshot(&[article("u1", "First"), article("u2", "Second")], day())
            .unwrap());
        // All duplicates: nothing new.
        assert!(!snap
            .record_daily_snapshot(&[article("u2", "Second")], day())
            .unwrap());

        let text = fs::read_to_string(dir.path().join("news").join("2025-06-01.json")).unwrap();
        let doc: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["articles"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_snapshot_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let snap = NewsSnapshotter::new(dir.path()).unwrap();
        let path = dir.path().join("news").join("2025-06-01.json");
        fs::write(&path, "not json at all").unwrap();

        assert!(snap
            .record_daily_snapshot(&[article("u1", "h")], day())
            .unwrap());
        let doc: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["articles"].as_array().unwrap().len(), 1);
    }
}
