use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::future::join_all;
use tracing::{error, info, warn};

use crate::bot::kelly::calculate_bet_size;
use crate::bot::risk::RiskManager;
use crate::config::Config;
use crate::journal::Journal;
use crate::ledger::PaperLedger;
use crate::llm::LlmClient;
use crate::marketdata::{detect_resolution, MarketRecord, ResolutionEvent};
use crate::models::{Bet, Signal, TradingMode};
use crate::news::NewsAggregator;
use crate::performance::{BetResult, PerformanceTracker};
use crate::polymarket::GammaClient;
use crate::snapshot::{MarketSnapshotter, NewsSnapshotter};
use crate::strategy::{NewsSpeedStrategy, SignalSource};

/// The live decision loop. Each tick runs sense → think → act → track:
/// fetch fresh news and markets, snapshot both for later replay, turn news
/// into signals, push accepted signals through sizing and the ledger, then
/// sweep open positions for resolutions and refresh performance metrics.
pub struct AgentLoop {
    config: Config,
    news: NewsAggregator,
    gamma: GammaClient,
    strategy: Box<dyn SignalSource>,
    risk: RiskManager,
    journal: Journal,
    market_snapshots: MarketSnapshotter,
    news_snapshots: NewsSnapshotter,
    ledger: PaperLedger,
    performance: PerformanceTracker,
}

impl AgentLoop {
    pub fn new(config: Config) -> Result<Self> {
        let api_key = config
            .llm_api_key
            .as_deref()
            .context("LLM_API_KEY is required for the agent loop")?;
        let llm = LlmClient::new(&config.llm_api_url, api_key, &config.llm_model)?;
        let strategy = NewsSpeedStrategy::new(
            llm,
            config.min_edge,
            config.min_confidence,
            config.max_markets_per_cycle,
        );
        Self::with_strategy(config, Box::new(strategy))
    }

    /// Build the loop around any signal source. Used by tests; `new` wires
    /// in the LLM-backed strategy.
    pub fn with_strategy(config: Config, strategy: Box<dyn SignalSource>) -> Result<Self> {
        let news = NewsAggregator::new(config.news_feeds.clone())?;
        let gamma = GammaClient::new(&config.polymarket_api_url)?;
        let risk = RiskManager::new(&config);
        let journal = Journal::new(&config.log_dir)?;
        let market_snapshots = MarketSnapshotter::new(&config.historical_dir)?;
        let news_snapshots = NewsSnapshotter::new(&config.historical_dir)?;
        let ledger = PaperLedger::open(&config.ledger_db_path, config.initial_bankroll)?;
        let performance = PerformanceTracker::open(&config.performance_db_path)?;

        Ok(AgentLoop {
            config,
            news,
            gamma,
            strategy,
            risk,
            journal,
            market_snapshots,
            news_snapshots,
            ledger,
            performance,
        })
    }

    /// Tick forever at the configured interval. Tick failures are logged
    /// and do not stop the loop.
    pub async fn run(&mut self) -> Result<()> {
        let interval = std::time::Duration::from_secs(self.config.check_interval_secs.max(1));
        info!(
            "Starting agent loop (mode={}, interval={}s)",
            self.config.trading_mode,
            interval.as_secs()
        );
        loop {
            let started = std::time::Instant::now();
            if let Err(e) = self.tick().await {
                error!("Agent tick failed: {:#}", e);
            }
            let elapsed = started.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
    }

    /// One sense → think → act → track iteration.
    pub async fn tick(&mut self) -> Result<()> {
        let today = Utc::now().date_naive();

        let articles = self.news.fetch_new_articles().await;
        let markets = self
            .gamma
            .fetch_tradable_markets(self.config.market_fetch_limit)
            .await?;

        self.market_snapshots.record_daily_snapshot(&markets, today)?;
        self.news_snapshots.record_daily_snapshot(&articles, today)?;

        let signals = self
            .strategy
            .generate_signals(&articles, &markets)
            .await
            .with_context(|| format!("Strategy {} failed", self.strategy.name()))?;
        info!(
            "Tick: {} articles, {} markets, {} signals",
            articles.len(),
            markets.len(),
            signals.len()
        );

        // Portfolio-level gates are evaluated once per tick; if either
        // trips, the whole batch is rejected.
        let positions = self.ledger.positions()?;
        let bankroll = self.ledger.bankroll()?;
        let daily = self.performance.daily_metrics(today)?;
        let limit_check = self.risk.check_position_limits(&positions);
        let loss_check = self.risk.check_daily_loss(daily.total_pnl, bankroll);
        let tick_gate = [&limit_check, &loss_check]
            .into_iter()
            .find(|c| !c.passed)
            .map(|c| c.reason.clone());

        for signal in signals {
            if let Some(reason) = &tick_gate {
                self.journal.log_signal(&signal, reason)?;
                continue;
            }
            if let Err(e) = self.handle_signal(&signal, &markets) {
                warn!("Failed to handle signal for {}: {:#}", signal.market_id, e);
            }
        }

        self.check_resolutions(today).await?;
        self.update_performance()?;
        Ok(())
    }

    fn handle_signal(&self, signal: &Signal, markets: &[MarketRecord]) -> Result<()> {
        let check = self.risk.check_signal(signal);
        if !check.passed {
            self.journal.log_signal(signal, &check.reason)?;
            return Ok(());
        }

        let Some(market) = markets.iter().find(|m| m.market_id == signal.market_id) else {
            self.journal
                .log_signal(signal, "market not found in snapshot")?;
            return Ok(());
        };

        let price = signal.current_odds;
        if price <= 0.0 {
            self.journal.log_signal(signal, "invalid market price")?;
            return Ok(());
        }

        let bankroll = self.ledger.bankroll()?;
        let bet_amount = calculate_bet_size(
            bankroll,
            signal.estimated_prob,
            1.0 / price,
            self.config.max_bet_pct,
            self.config.kelly_fraction,
        );
        if bet_amount <= 0.0 {
            self.journal.log_signal(signal, "bet sizing returned 0")?;
            return Ok(());
        }

        let liquidity = self
            .risk
            .check_liquidity(bet_amount, market.volume_24h.unwrap_or(0.0));
        if !liquidity.passed {
            self.journal.log_signal(signal, &liquidity.reason)?;
            return Ok(());
        }

        self.journal.log_signal(signal, "executed")?;

        let bet = Bet {
            timestamp: signal.timestamp,
            market_id: signal.market_id.clone(),
            direction: signal.direction,
            amount_usd: bet_amount,
            odds_at_execution: price,
            estimated_prob: signal.estimated_prob,
            kelly_fraction: self.config.kelly_fraction,
            mode: self.config.trading_mode,
        };
        self.execute_bet(&bet)
    }

    fn execute_bet(&self, bet: &Bet) -> Result<()> {
        match bet.mode {
            TradingMode::Paper | TradingMode::Backtest => {
                match self.ledger.execute(bet)? {
                    Some(trade_id) => {
                        info!(
                            "Paper trade {}: {} ${:.2} on {} at {:.3}",
                            trade_id, bet.direction, bet.amount_usd, bet.market_id, bet.odds_at_execution
                        );
                        self.journal.log_bet(bet)?;
                    }
                    None => warn!("Ledger rejected bet on {}", bet.market_id),
                }
                Ok(())
            }
            TradingMode::Live => anyhow::bail!("live trading is not implemented"),
        }
    }

    /// Re-fetch every market we hold a position in and settle the ones
    /// that resolved since the last tick.
    async fn check_resolutions(&self, today: chrono::NaiveDate) -> Result<()> {
        let positions = self.ledger.positions()?;
        if positions.is_empty() {
            return Ok(());
        }

        let fetches = positions
            .iter()
            .map(|p| self.gamma.fetch_market(&p.market_id));
        let raw_markets = join_all(fetches).await;

        let mut events: Vec<ResolutionEvent> = Vec::new();
        for (position, raw) in positions.iter().zip(raw_markets) {
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(
                        "Failed to fetch market {} for resolution: {:#}",
                        position.market_id, e
                    );
                    continue;
                }
            };
            let Some(event) = detect_resolution(&raw) else {
                continue;
            };

            let pnl = self.ledger.resolve(&event.market_id, event.outcome)?;
            info!(
                "Resolved position {} ({}): P&L {:.2}",
                event.market_id, event.outcome, pnl
            );
            self.record_performance_for_market(&event.market_id)?;
            events.push(event);
        }

        self.market_snapshots.record_resolutions(&events, today)?;
        Ok(())
    }

    fn record_performance_for_market(&self, market_id: &str) -> Result<()> {
        let trades = self
            .ledger
            .trades(Some(market_id), Some(crate::models::TradeStatus::Resolved))?;
        for trade in trades {
            self.performance.record_bet_result(
                &format!("paper:{}", trade.id),
                trade.pnl.unwrap_or(0.0),
                &BetResult {
                    market_id: Some(trade.market_id.clone()),
                    direction: Some(trade.direction.to_string()),
                    amount: Some(trade.amount_usd),
                    odds: Some(trade.odds_at_execution),
                    outcome: trade.outcome.map(|o| o.as_str().to_string()),
                    edge_at_entry: None,
                    resolved_at: None,
                },
            )?;
        }
        Ok(())
    }

    fn update_performance(&self) -> Result<()> {
        let metrics = self.performance.all_time_metrics()?;
        self.journal.log_performance(&metrics)?;
        Ok(())
    }
}
