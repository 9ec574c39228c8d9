use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::models::PerformanceMetrics;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bet_results (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    bet_id        TEXT UNIQUE,
    market_id     TEXT,
    direction     TEXT,
    amount        REAL,
    odds          REAL,
    outcome       TEXT,
    pnl           REAL,
    edge_at_entry REAL,
    resolved_at   TEXT NOT NULL
);
"#;

/// Everything we know about one settled bet, for the record keeper. All
/// fields but pnl are optional; re-recording the same `bet_id` overwrites.
#[derive(Debug, Clone, Default)]
pub struct BetResult {
    pub market_id: Option<String>,
    pub direction: Option<String>,
    pub amount: Option<f64>,
    pub odds: Option<f64>,
    pub outcome: Option<String>,
    pub edge_at_entry: Option<f64>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Append-only store of settled-bet results, independent of the ledger. Fed
/// post-hoc by whatever orchestrator resolves trades.
#[derive(Clone)]
pub struct PerformanceTracker {
    conn: Arc<Mutex<Connection>>,
}

impl PerformanceTracker {
    /// Open (or create) the performance database; `":memory:"` supported.
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
            Connection::open(path)?
        };
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(PerformanceTracker {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Upsert one settled bet keyed by `bet_id`. Recording the same id twice
    /// overwrites rather than duplicates, so resolution sweeps can re-emit
    /// rows safely.
    pub fn record_bet_result(&self, bet_id: &str, pnl: f64, detail: &BetResult) -> Result<()> {
        let resolved_at = detail.resolved_at.unwrap_or_else(Utc::now);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bet_results
                (bet_id, market_id, direction, amount, odds, outcome, pnl, edge_at_entry, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(bet_id) DO UPDATE SET
                market_id=excluded.market_id,
                direction=excluded.direction,
                amount=excluded.amount,
                odds=excluded.odds,
                outcome=excluded.outcome,
                pnl=excluded.pnl,
                edge_at_entry=excluded.edge_at_entry,
                resolved_at=excluded.resolved_at",
            params![
                bet_id,
                detail.market_id,
                detail.direction,
                detail.amount,
                detail.odds,
                detail.outcome,
                pnl,
                detail.edge_at_entry,
                resolved_at,
            ],
        )?;
        Ok(())
    }

    /// Aggregate metrics over bets resolved on the given UTC date.
    ///
    /// Drawdown needs a multi-point equity curve, which a single-day slice of
    /// per-bet P&L cannot provide; it is reported as 0 here by design.
    pub fn daily_metrics(&self, day: NaiveDate) -> Result<PerformanceMetrics> {
        let day_str = day.format("%Y-%m-%d").to_string();
        let conn = self.conn.lock().unwrap();
        let (num_bets, wins, total_pnl, avg_edge): (i64, i64, f64, Option<f64>) = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN pnl > 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(pnl), 0.0),
                AVG(edge_at_entry)
             FROM bet_results
             WHERE substr(resolved_at, 1, 10) = ?1",
            params![day_str],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;

        Ok(PerformanceMetrics {
            date: day_str,
            total_pnl,
            win_rate: win_rate(wins, num_bets),
            num_bets,
            avg_edge: avg_edge.unwrap_or(0.0),
            max_drawdown: 0.0,
        })
    }

    /// Aggregate metrics over every recorded bet. Max drawdown comes from a
    /// synthetic equity curve built by cumulative-summing P&L in resolution
    /// order, starting at 1.0.
    pub fn all_time_metrics(&self) -> Result<PerformanceMetrics> {
        let conn = self.conn.lock().unwrap();
        let (num_bets, wins, total_pnl, avg_edge): (i64, i64, f64, Option<f64>) = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN pnl > 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(pnl), 0.0),
                AVG(edge_at_entry)
             FROM bet_results",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;

        let mut stmt =
            conn.prepare("SELECT COALESCE(pnl, 0.0) FROM bet_results ORDER BY resolved_at ASC, id ASC")?;
        let pnls = stmt
            .query_map([], |r| r.get::<_, f64>(0))?
            .collect::<rusqlite::Result<Vec<f64>>>()?;

        let mut equity_curve = Vec::with_capacity(pnls.len() + 1);
        let mut current = 1.0;
        equity_curve.push(current);
        for pnl in pnls {
            current += pnl;
            equity_curve.push(current);
        }

        Ok(PerformanceMetrics {
            date: "all_time".to_string(),
            total_pnl,
            win_rate: win_rate(wins, num_bets),
            num_bets,
            avg_edge: avg_edge.unwrap_or(0.0),
            max_drawdown: max_drawdown(&equity_curve),
        })
    }
}

fn win_rate(wins: i64, num_bets: i64) -> f64 {
    if num_bets == 0 {
        0.0
    } else {
        wins as f64 / num_bets as f64
    }
}

/// Annualized Sharpe ratio over a sequence of periodic (daily) returns:
/// `mean / stdev × √365`, using population standard deviation. Returns 0 for
/// fewer than 2 points or zero deviation, where the ratio is undefined.
pub fn sharpe_ratio(daily_returns: &[f64]) -> f64 {
    if daily_returns.len() < 2 {
        return 0.0;
    }
    let n = daily_returns.len() as f64;
    let mean = daily_returns.iter().sum::<f64>() / n;
    let variance = daily_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return 0.0;
    }
    (mean / std_dev) * 365.0_f64.sqrt()
}

/// Maximum peak-to-trough drawdown over an equity curve, as a fraction of
/// the running peak. Curves shorter than 2 points have no drawdown.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }
    let mut peak = equity_curve[0];
    let mut max_dd = 0.0;
    for &value in equity_curve {
        if value > peak {
            peak = value;
        }
        if peak <= 0.0 {
            continue;
        }
        let dd = (peak - value) / peak;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn tracker() -> PerformanceTracker {
        PerformanceTracker::open(":memory:").unwrap()
    }

    fn detail_at(pnl_day: NaiveDate, edge: f64) -> BetResult {
        BetResult {
            market_id: Some("mkt1".into()),
            direction: Some("YES".into()),
            amount: Some(10.0),
            odds: Some(0.5),
            outcome: Some("win".into()),
            edge_at_entry: Some(edge),
            resolved_at: Some(
                Utc.from_utc_datetime(&pnl_day.and_hms_opt(12, 0, 0).unwrap()),
            ),
        }
    }

    #[test]
    fn test_max_drawdown_reference_curve() {
        let dd = max_drawdown(&[1.0, 1.2, 0.9, 1.5]);
        assert_relative_eq!(dd, 0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_max_drawdown_short_or_monotonic() {
        assert_relative_eq!(max_drawdown(&[]), 0.0, epsilon = 1e-9);
        assert_relative_eq!(max_drawdown(&[1.0]), 0.0, epsilon = 1e-9);
        assert_relative_eq!(max_drawdown(&[1.0, 1.1, 1.2]), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_max_drawdown_skips_non_positive_peak() {
        // A curve that starts at zero cannot produce a meaningful ratio.
        let dd = max_drawdown(&[0.0, -1.0, -2.0]);
        assert_relative_eq!(dd, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sharpe_requires_two_points() {
        assert_relative_eq!(sharpe_ratio(&[]), 0.0, epsilon = 1e-9);
        assert_relative_eq!(sharpe_ratio(&[0.1]), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sharpe_zero_for_constant_returns() {
        assert_relative_eq!(sharpe_ratio(&[0.01, 0.01, 0.01]), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sharpe_annualization() {
        let returns = [0.01, 0.03];
        // mean 0.02, population stdev 0.01 → 2.0 × √365
        let expected = 2.0 * 365.0_f64.sqrt();
        assert_relative_eq!(sharpe_ratio(&returns), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_record_and_daily_metrics() {
        let t = tracker();
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        t.record_bet_result("bet-1", 10.0, &detail_at(day, 0.08))
            .unwrap();
        t.record_bet_result("bet-2", -5.0, &detail_at(day, 0.06))
            .unwrap();

        let metrics = t.daily_metrics(day).unwrap();
        assert_eq!(metrics.num_bets, 2);
        assert_relative_eq!(metrics.total_pnl, 5.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.win_rate, 0.5, epsilon = 1e-9);
        assert_relative_eq!(metrics.avg_edge, 0.07, epsilon = 1e-9);
        assert_relative_eq!(metrics.max_drawdown, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_daily_metrics_empty_day() {
        let t = tracker();
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let metrics = t.daily_metrics(day).unwrap();
        assert_eq!(metrics.num_bets, 0);
        assert_relative_eq!(metrics.win_rate, 0.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.avg_edge, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_upsert_overwrites_same_bet_id() {
        let t = tracker();
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        t.record_bet_result("bet-1", 10.0, &detail_at(day, 0.08))
            .unwrap();
        t.record_bet_result("bet-1", -3.0, &detail_at(day, 0.08))
            .unwrap();

        let metrics = t.all_time_metrics().unwrap();
        assert_eq!(metrics.num_bets, 1);
        assert_relative_eq!(metrics.total_pnl, -3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_all_time_metrics_drawdown_from_equity_curve() {
        let t = tracker();
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        // Equity curve: 1.0 → 1.2 → 0.9 → 1.5
        t.record_bet_result("bet-1", 0.2, &detail_at(day, 0.05))
            .unwrap();
        t.record_bet_result(
            "bet-2",
            -0.3,
            &detail_at(day.succ_opt().unwrap(), 0.05),
        )
        .unwrap();
        t.record_bet_result(
            "bet-3",
            0.6,
            &detail_at(day.succ_opt().unwrap().succ_opt().unwrap(), 0.05),
        )
        .unwrap();

        let metrics = t.all_time_metrics().unwrap();
        assert_eq!(metrics.num_bets, 3);
        assert_relative_eq!(metrics.total_pnl, 0.5, epsilon = 1e-9);
        assert_relative_eq!(metrics.max_drawdown, 0.25, epsilon = 1e-9);
    }
}
