use crate::config::Config;
use crate::models::{Position, Signal};

/// Outcome of a single risk rule. Rejections are expected, frequent results
/// rather than errors; the caller logs the reason and moves on.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskCheck {
    pub passed: bool,
    pub reason: String,
}

impl RiskCheck {
    fn pass() -> Self {
        RiskCheck {
            passed: true,
            reason: "passed".to_string(),
        }
    }

    fn reject(reason: String) -> Self {
        RiskCheck {
            passed: false,
            reason,
        }
    }
}

/// Stateless rule set guarding bet entry. Each check is independently
/// callable; the orchestrator decides which subset applies where (the live
/// loop runs the edge check per signal and liquidity after sizing, the
/// backtester runs the edge check only).
pub struct RiskManager {
    pub min_edge: f64,
    pub max_bet_pct: f64,
    pub max_daily_loss_pct: f64,
    pub max_positions: usize,
    pub max_market_volume_pct: f64,
}

impl RiskManager {
    pub fn new(config: &Config) -> Self {
        RiskManager {
            min_edge: config.min_edge,
            max_bet_pct: config.max_bet_pct,
            max_daily_loss_pct: config.max_daily_loss_pct,
            max_positions: config.max_positions,
            max_market_volume_pct: config.max_market_volume_pct,
        }
    }

    /// Reject signals whose edge falls below the configured minimum.
    pub fn check_signal(&self, signal: &Signal) -> RiskCheck {
        if signal.edge < self.min_edge {
            return RiskCheck::reject(format!(
                "edge {:.3} below min_edge {:.3}",
                signal.edge, self.min_edge
            ));
        }
        RiskCheck::pass()
    }

    /// Reject when the open-position count has reached the cap.
    pub fn check_position_limits(&self, positions: &[Position]) -> RiskCheck {
        if positions.len() >= self.max_positions {
            return RiskCheck::reject(format!(
                "max positions reached ({})",
                self.max_positions
            ));
        }
        RiskCheck::pass()
    }

    /// Reject when today's realized loss has breached the daily limit, or
    /// when the bankroll is exhausted outright.
    pub fn check_daily_loss(&self, daily_pnl: f64, bankroll: f64) -> RiskCheck {
        if bankroll <= 0.0 {
            return RiskCheck::reject("bankroll <= 0".to_string());
        }
        let limit = -self.max_daily_loss_pct * bankroll;
        if daily_pnl <= limit {
            return RiskCheck::reject(format!(
                "daily loss {:.2} exceeds limit {:.2}",
                daily_pnl, limit
            ));
        }
        RiskCheck::pass()
    }

    /// Reject bets that are large relative to the market's trailing 24h
    /// volume, or when volume data is unavailable.
    pub fn check_liquidity(&self, bet_size: f64, market_volume: f64) -> RiskCheck {
        if market_volume <= 0.0 {
            return RiskCheck::reject("market volume unavailable".to_string());
        }
        if bet_size > self.max_market_volume_pct * market_volume {
            return RiskCheck::reject(format!(
                "bet size {:.2} exceeds {:.0}% of market volume",
                bet_size,
                self.max_market_volume_pct * 100.0
            ));
        }
        RiskCheck::pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::Utc;

    fn manager() -> RiskManager {
        RiskManager {
            min_edge: 0.05,
            max_bet_pct: 0.05,
            max_daily_loss_pct: 0.10,
            max_positions: 10,
            max_market_volume_pct: 0.10,
        }
    }

    fn signal_with_edge(edge: f64) -> Signal {
        Signal {
            timestamp: Utc::now(),
            market_id: "mkt1".into(),
            market_question: "Will it happen?".into(),
            direction: Direction::Yes,
            current_odds: 0.5,
            estimated_prob: 0.5 + edge,
            edge,
            confidence: 7,
            reasoning: "test".into(),
            news_headline: "headline".into(),
        }
    }

    fn position(market_id: &str) -> Position {
        Position {
            market_id: market_id.into(),
            direction: Direction::Yes,
            shares: 10.0,
            avg_price: 0.5,
            current_price: 0.5,
            unrealized_pnl: 0.0,
        }
    }

    #[test]
    fn test_edge_below_minimum_rejected() {
        let check = manager().check_signal(&signal_with_edge(0.01));
        assert!(!check.passed);
        assert!(check.reason.contains("min_edge"));
    }

    #[test]
    fn test_edge_at_minimum_accepted() {
        let check = manager().check_signal(&signal_with_edge(0.05));
        assert!(check.passed);
    }

    #[test]
    fn test_edge_negative_rejected() {
        let check = manager().check_signal(&signal_with_edge(-0.10));
        assert!(!check.passed);
    }

    #[test]
    fn test_position_limit() {
        let m = manager();
        let under: Vec<Position> = (0..9).map(|i| position(&format!("m{i}"))).collect();
        assert!(m.check_position_limits(&under).passed);

        let at: Vec<Position> = (0..10).map(|i| position(&format!("m{i}"))).collect();
        let check = m.check_position_limits(&at);
        assert!(!check.passed);
        assert!(check.reason.contains("max positions"));
    }

    #[test]
    fn test_daily_loss_limit() {
        let m = manager();
        assert!(m.check_daily_loss(-5.0, 1000.0).passed);
        // Limit for $1000 bankroll at 10% is -$100.
        assert!(!m.check_daily_loss(-100.0, 1000.0).passed);
        assert!(!m.check_daily_loss(-250.0, 1000.0).passed);
    }

    #[test]
    fn test_daily_loss_zero_bankroll() {
        let check = manager().check_daily_loss(0.0, 0.0);
        assert!(!check.passed);
        assert!(check.reason.contains("bankroll"));
    }

    #[test]
    fn test_liquidity_limit() {
        let m = manager();
        assert!(m.check_liquidity(50.0, 1000.0).passed);
        assert!(!m.check_liquidity(150.0, 1000.0).passed);
    }

    #[test]
    fn test_liquidity_unavailable_volume() {
        let m = manager();
        assert!(!m.check_liquidity(10.0, 0.0).passed);
        assert!(!m.check_liquidity(10.0, -1.0).passed);
    }
}
