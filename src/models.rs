use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Side of a binary market. Doubles as the resolution outcome: a market
/// resolves YES or NO, and a position wins when its direction matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "YES")]
    Yes,
    #[serde(rename = "NO")]
    No,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Yes => "YES",
            Direction::No => "NO",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("outcome must be YES or NO, got {0:?}")]
pub struct InvalidDirection(pub String);

impl FromStr for Direction {
    type Err = InvalidDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "YES" | "Y" => Ok(Direction::Yes),
            "NO" | "N" => Ok(Direction::No),
            other => Err(InvalidDirection(other.to_string())),
        }
    }
}

/// Which execution path a bet is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Backtest,
    Paper,
    Live,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradingMode::Backtest => "backtest",
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
        };
        f.write_str(s)
    }
}

/// A candidate trade judgment produced by a signal source. Immutable once
/// built; consumed once by the risk filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub market_id: String,
    pub market_question: String,
    pub direction: Direction,
    /// Market price for the chosen direction at signal time (0.0–1.0).
    pub current_odds: f64,
    /// Our estimated probability that the chosen direction is correct.
    pub estimated_prob: f64,
    /// estimated_prob − current_odds; may be negative.
    pub edge: f64,
    /// Model self-reported confidence, 1–10.
    pub confidence: u8,
    pub reasoning: String,
    pub news_headline: String,
}

/// An intent to execute, derived from an accepted signal plus sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub timestamp: DateTime<Utc>,
    pub market_id: String,
    pub direction: Direction,
    pub amount_usd: f64,
    /// Price paid per share at execution (0.0–1.0).
    pub odds_at_execution: f64,
    pub estimated_prob: f64,
    pub kelly_fraction: f64,
    pub mode: TradingMode,
}

/// Lifecycle state of a ledger trade row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Resolved,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for TradeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TradeStatus::Open),
            "resolved" => Ok(TradeStatus::Resolved),
            other => anyhow::bail!("unknown trade status {:?}", other),
        }
    }
}

/// Win/lose result stamped on a trade at resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOutcome {
    Win,
    Lose,
}

impl TradeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeOutcome::Win => "win",
            TradeOutcome::Lose => "lose",
        }
    }
}

/// One executed bet as recorded by the paper-trading ledger. Created open,
/// transitions exactly once to resolved, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub market_id: String,
    pub direction: Direction,
    pub amount_usd: f64,
    pub odds_at_execution: f64,
    pub shares: f64,
    pub status: TradeStatus,
    pub outcome: Option<TradeOutcome>,
    pub pnl: Option<f64>,
}

/// Aggregated open exposure per market. At most one per market id; the
/// direction is fixed at creation (no hedging in this engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub market_id: String,
    pub direction: Direction,
    pub shares: f64,
    /// Volume-weighted average entry price across same-direction trades.
    pub avg_price: f64,
    /// Defaults to avg_price in the absence of live marks.
    pub current_price: f64,
    /// Reported as 0 without live marks; known simplification.
    pub unrealized_pnl: f64,
}

/// Aggregate statistics over settled bets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// ISO date the slice covers, or "all_time".
    pub date: String,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub num_bets: i64,
    pub avg_edge: f64,
    pub max_drawdown: f64,
}
