use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::bot::kelly::calculate_bet_size;
use crate::bot::risk::RiskManager;
use crate::config::Config;
use crate::marketdata::{normalize_market, MarketRecord};
use crate::models::Direction;
use crate::news::NewsArticle;
use crate::performance::{max_drawdown, sharpe_ratio};
use crate::strategy::SignalSource;

/// Summary of a completed replay.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub total_pnl: f64,
    pub win_rate: f64,
    pub num_trades: usize,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub trades: Vec<BacktestTrade>,
}

/// One settled backtest trade.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestTrade {
    pub date: NaiveDate,
    pub market_id: String,
    pub direction: Direction,
    pub cost: f64,
    pub shares: f64,
    pub outcome: Direction,
    pub pnl: f64,
    pub edge_at_entry: f64,
}

struct OpenLane {
    direction: Direction,
    shares: f64,
    cost: f64,
    edge: f64,
}

/// Day-by-day replay of the live sizing and risk logic over recorded
/// snapshots. Positions are tracked in a plain map rather than the SQLite
/// ledger; the backtester only ever holds one lane per market and needs no
/// durability.
pub struct BacktestRunner<S: SignalSource> {
    strategy: S,
    start_date: NaiveDate,
    end_date: NaiveDate,
    initial_bankroll: f64,
    base_dir: PathBuf,
    risk: RiskManager,
    max_bet_pct: f64,
    kelly_fraction: f64,
}

impl<S: SignalSource> BacktestRunner<S> {
    pub fn new(
        strategy: S,
        start_date: NaiveDate,
        end_date: NaiveDate,
        base_dir: impl Into<PathBuf>,
        config: &Config,
    ) -> Self {
        BacktestRunner {
            strategy,
            start_date,
            end_date,
            initial_bankroll: config.initial_bankroll,
            base_dir: base_dir.into(),
            risk: RiskManager::new(config),
            max_bet_pct: config.max_bet_pct,
            kelly_fraction: config.kelly_fraction,
        }
    }

    /// Replay every day in `[start_date, end_date]` and return the summary.
    pub async fn run(&self) -> Result<BacktestResult> {
        let mut bankroll = self.initial_bankroll;
        let mut open_positions: HashMap<String, OpenLane> = HashMap::new();
        let mut trades: Vec<BacktestTrade> = Vec::new();
        let mut equity_curve = vec![self.initial_bankroll];
        let mut daily_returns: Vec<f64> = Vec::new();

        let mut day = self.start_date;
        while day <= self.end_date {
            let prev_bankroll = bankroll;

            let articles = load_news_day(&self.base_dir, day)?;
            let markets = load_markets_day(&self.base_dir, day)?;
            let signals = self
                .strategy
                .generate_signals(&articles, &markets)
                .await
                .with_context(|| format!("Strategy failed on {}", day))?;
            debug!("{}: {} articles, {} markets, {} signals",
                day, articles.len(), markets.len(), signals.len());

            for signal in signals {
                // Liquidity is deliberately not checked here: recorded
                // snapshots carry no live volume semantics.
                if !self.risk.check_signal(&signal).passed {
                    continue;
                }
                let price = signal.current_odds;
                if price <= 0.0 {
                    continue;
                }
                let decimal_odds = 1.0 / price;
                let bet_amount = calculate_bet_size(
                    bankroll,
                    signal.estimated_prob,
                    decimal_odds,
                    self.max_bet_pct,
                    self.kelly_fraction,
                );
                if bet_amount <= 0.0 || bet_amount > bankroll {
                    continue;
                }

                bankroll -= bet_amount;
                open_positions.insert(
                    signal.market_id.clone(),
                    OpenLane {
                        direction: signal.direction,
                        shares: bet_amount / price,
                        cost: bet_amount,
                        edge: signal.edge,
                    },
                );
            }

            for (market_id, outcome) in load_resolutions_day(&self.base_dir, day)? {
                let Some(lane) = open_positions.remove(&market_id) else {
                    continue;
                };
                let won = lane.direction == outcome;
                let payout = if won { lane.shares } else { 0.0 };
                let pnl = payout - lane.cost;
                bankroll += payout;

                trades.push(BacktestTrade {
                    date: day,
                    market_id,
                    direction: lane.direction,
                    cost: lane.cost,
                    shares: lane.shares,
                    outcome,
                    pnl,
                    edge_at_entry: lane.edge,
                });
            }

            equity_curve.push(bankroll);
            daily_returns.push(if prev_bankroll > 0.0 {
                (bankroll - prev_bankroll) / prev_bankroll
            } else {
                0.0
            });

            day += Duration::days(1);
        }

        let total_pnl = bankroll - self.initial_bankroll;
        let num_trades = trades.len();
        let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
        let win_rate = if num_trades > 0 {
            wins as f64 / num_trades as f64
        } else {
            0.0
        };

        info!(
            "Backtest {} to {}: {} trades, pnl {:.2}",
            self.start_date, self.end_date, num_trades, total_pnl
        );

        Ok(BacktestResult {
            total_pnl,
            win_rate,
            num_trades,
            sharpe_ratio: sharpe_ratio(&daily_returns),
            max_drawdown: max_drawdown(&equity_curve),
            trades,
        })
    }
}

fn read_day_file(base_dir: &Path, kind: &str, day: NaiveDate) -> Result<Option<Value>> {
    let path = base_dir.join(kind).join(format!("{}.json", day));
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(Some(value))
}

fn load_news_day(base_dir: &Path, day: NaiveDate) -> Result<Vec<NewsArticle>> {
    let Some(doc) = read_day_file(base_dir, "news", day)? else {
        return Ok(Vec::new());
    };
    let Some(raw) = doc.get("articles").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let articles = raw
        .iter()
        .filter_map(|a| serde_json::from_value(a.clone()).ok())
        .collect();
    Ok(articles)
}

fn load_markets_day(base_dir: &Path, day: NaiveDate) -> Result<Vec<MarketRecord>> {
    let Some(doc) = read_day_file(base_dir, "markets", day)? else {
        return Ok(Vec::new());
    };
    let Some(raw) = doc.get("markets").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    Ok(raw.iter().filter_map(normalize_market).collect())
}

fn load_resolutions_day(base_dir: &Path, day: NaiveDate) -> Result<Vec<(String, Direction)>> {
    let Some(doc) = read_day_file(base_dir, "resolutions", day)? else {
        return Ok(Vec::new());
    };
    let Some(raw) = doc.get("resolutions").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let resolutions = raw
        .iter()
        .filter_map(|r| {
            let market_id = r.get("market_id").and_then(Value::as_str)?.to_string();
            let outcome = r
                .get("outcome")
                .and_then(Value::as_str)?
                .parse::<Direction>()
                .ok()?;
            Some((market_id, outcome))
        })
        .collect();
    Ok(resolutions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Signal;
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use chrono::Utc;

    struct AlwaysYesStrategy {
        edge: f64,
    }

    #[async_trait]
    impl SignalSource for AlwaysYesStrategy {
        fn name(&self) -> &'static str {
            "always_yes"
        }

        async fn generate_signals(
            &self,
            articles: &[NewsArticle],
            markets: &[MarketRecord],
        ) -> Result<Vec<Signal>> {
            if articles.is_empty() {
                return Ok(Vec::new());
            }
            Ok(markets
                .iter()
                .map(|m| Signal {
                    timestamp: Utc::now(),
                    market_id: m.market_id.clone(),
                    market_question: m.question.clone(),
                    direction: Direction::Yes,
                    current_odds: m.yes_price,
                    estimated_prob: m.yes_price + self.edge,
                    edge: self.edge,
                    confidence: 8,
                    reasoning: "stub".into(),
                    news_headline: articles[0].headline.clone(),
                })
                .collect())
        }
    }

    fn test_config() -> Config {
        Config {
            initial_bankroll: 500.0,
            max_bet_pct: 0.05,
            kelly_fraction: 0.5,
            min_edge: 0.05,
            ..Config::default_for_tests()
        }
    }

    fn write_day(dir: &Path, kind: &str, day: &str, body: &str) {
        let sub = dir.join(kind);
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join(format!("{day}.json")), body).unwrap();
    }

    #[tokio::test]
    async fn test_single_day_win() {
        let dir = tempfile::tempdir().unwrap();
        write_day(
            dir.path(),
            "news",
            "2025-06-01",
            r#"{"articles": [{"headline": "Big news", "summary": "s", "source": "t",
                "url": "u", "published_at": "2025-06-01T00:00:00Z"}]}"#,
        );
        write_day(
            dir.path(),
            "markets",
            "2025-06-01",
            r#"{"markets": [{"id": "m1", "question": "Will it?",
                "yes_price": 0.5, "no_price": 0.5}]}"#,
        );
        write_day(
            dir.path(),
            "resolutions",
            "2025-06-01",
            r#"{"resolutions": [{"market_id": "m1", "outcome": "YES"}]}"#,
        );

        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let runner = BacktestRunner::new(
            AlwaysYesStrategy { edge: 0.1 },
            day,
            day,
            dir.path(),
            &test_config(),
        );
        let result = runner.run().await.unwrap();

        assert_eq!(result.num_trades, 1);
        assert!(result.total_pnl > 0.0);
        assert_relative_eq!(result.win_rate, 1.0, epsilon = 1e-9);
        let trade = &result.trades[0];
        assert_eq!(trade.market_id, "m1");
        assert_eq!(trade.direction, Direction::Yes);
        // A win at price 0.5 pays out double the stake.
        assert_relative_eq!(trade.pnl, trade.cost, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_losing_resolution_debits_full_stake() {
        let dir = tempfile::tempdir().unwrap();
        write_day(
            dir.path(),
            "news",
            "2025-06-01",
            r#"{"articles": [{"headline": "h", "summary": "s", "source": "t",
                "url": "u", "published_at": "2025-06-01T00:00:00Z"}]}"#,
        );
        write_day(
            dir.path(),
            "markets",
            "2025-06-01",
            r#"{"markets": [{"id": "m1", "question": "Q",
                "yes_price": 0.5, "no_price": 0.5}]}"#,
        );
        write_day(
            dir.path(),
            "resolutions",
            "2025-06-01",
            r#"{"resolutions": [{"market_id": "m1", "outcome": "NO"}]}"#,
        );

        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let runner = BacktestRunner::new(
            AlwaysYesStrategy { edge: 0.1 },
            day,
            day,
            dir.path(),
            &test_config(),
        );
        let result = runner.run().await.unwrap();

        assert_eq!(result.num_trades, 1);
        assert_relative_eq!(result.win_rate, 0.0, epsilon = 1e-9);
        let trade = &result.trades[0];
        assert_relative_eq!(trade.pnl, -trade.cost, epsilon = 1e-9);
        assert_relative_eq!(result.total_pnl, trade.pnl, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_missing_day_files_mean_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let start = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
        let runner = BacktestRunner::new(
            AlwaysYesStrategy { edge: 0.1 },
            start,
            end,
            dir.path(),
            &test_config(),
        );
        let result = runner.run().await.unwrap();
        assert_eq!(result.num_trades, 0);
        assert_relative_eq!(result.total_pnl, 0.0, epsilon = 1e-9);
        assert_relative_eq!(result.win_rate, 0.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_low_edge_signals_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_day(
            dir.path(),
            "news",
            "2025-06-01",
            r#"{"articles": [{"headline": "h", "summary": "s", "source": "t",
                "url": "u", "published_at": "2025-06-01T00:00:00Z"}]}"#,
        );
        write_day(
            dir.path(),
            "markets",
            "2025-06-01",
            r#"{"markets": [{"id": "m1", "question": "Q",
                "yes_price": 0.5, "no_price": 0.5}]}"#,
        );

        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let runner = BacktestRunner::new(
            AlwaysYesStrategy { edge: 0.01 },
            day,
            day,
            dir.path(),
            &test_config(),
        );
        let result = runner.run().await.unwrap();
        assert_eq!(result.num_trades, 0);
    }

    #[tokio::test]
    async fn test_unresolved_position_stays_out_of_trade_log() {
        let dir = tempfile::tempdir().unwrap();
        write_day(
            dir.path(),
            "news",
            "2025-06-01",
            r#"{"articles": [{"headline": "h", "summary": "s", "source": "t",
                "url": "u", "published_at": "2025-06-01T00:00:00Z"}]}"#,
        );
        write_day(
            dir.path(),
            "markets",
            "2025-06-01",
            r#"{"markets": [{"id": "m1", "question": "Q",
                "yes_price": 0.5, "no_price": 0.5}]}"#,
        );

        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let runner = BacktestRunner::new(
            AlwaysYesStrategy { edge: 0.1 },
            day,
            day,
            dir.path(),
            &test_config(),
        );
        let result = runner.run().await.unwrap();
        assert_eq!(result.num_trades, 0);
        // Stake left in the open position shows up as negative equity drift.
        assert!(result.total_pnl < 0.0);
    }
}
