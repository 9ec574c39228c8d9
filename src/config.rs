use clap::Args;

use crate::models::TradingMode;

/// Runtime settings shared by the live loop and the backtester. Every knob
/// can come from a flag or an environment variable.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Trading mode (backtest, paper, live)
    #[arg(long, env = "TRADING_MODE", value_enum, default_value = "paper")]
    pub trading_mode: TradingMode,

    /// Starting bankroll in USD
    #[arg(long, env = "BANKROLL", default_value = "500.0")]
    pub initial_bankroll: f64,

    /// Maximum single bet as a fraction of bankroll
    #[arg(long, env = "MAX_BET_PCT", default_value = "0.05")]
    pub max_bet_pct: f64,

    /// Daily realized-loss limit as a fraction of bankroll
    #[arg(long, env = "MAX_DAILY_LOSS_PCT", default_value = "0.10")]
    pub max_daily_loss_pct: f64,

    /// Minimum edge (estimated_prob − price) required to bet
    #[arg(long, env = "MIN_EDGE", default_value = "0.05")]
    pub min_edge: f64,

    /// Fraction of full Kelly to bet (0.0–1.0)
    #[arg(long, env = "KELLY_FRACTION", default_value = "0.5")]
    pub kelly_fraction: f64,

    /// Maximum number of simultaneously open positions
    #[arg(long, env = "MAX_POSITIONS", default_value = "10")]
    pub max_positions: usize,

    /// Maximum bet as a fraction of the market's trailing 24h volume
    #[arg(long, env = "MAX_MARKET_VOLUME_PCT", default_value = "0.10")]
    pub max_market_volume_pct: f64,

    /// Seconds between ticks in continuous mode
    #[arg(long, env = "CHECK_INTERVAL_SECS", default_value = "60")]
    pub check_interval_secs: u64,

    /// How many tradable markets to pull per tick
    #[arg(long, env = "MARKET_FETCH_LIMIT", default_value = "200")]
    pub market_fetch_limit: usize,

    /// Minimum model confidence (1–10) to keep a signal
    #[arg(long, env = "MIN_CONFIDENCE", default_value = "6")]
    pub min_confidence: u8,

    /// Markets shortlisted per news article for the model
    #[arg(long, env = "MAX_MARKETS_PER_CYCLE", default_value = "5")]
    pub max_markets_per_cycle: usize,

    /// Polymarket Gamma API base URL
    #[arg(
        long,
        env = "POLYMARKET_API_URL",
        default_value = "https://gamma-api.polymarket.com"
    )]
    pub polymarket_api_url: String,

    /// OpenAI-compatible chat-completions base URL
    #[arg(long, env = "LLM_API_URL", default_value = "https://api.openai.com/v1")]
    pub llm_api_url: String,

    /// API key for the LLM endpoint
    #[arg(long, env = "LLM_API_KEY")]
    pub llm_api_key: Option<String>,

    /// Model name to query
    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o")]
    pub llm_model: String,

    /// RSS/Atom feed URLs to poll, comma separated
    #[arg(
        long,
        env = "NEWS_FEEDS",
        value_delimiter = ',',
        default_values_t = default_news_feeds()
    )]
    pub news_feeds: Vec<String>,

    /// SQLite path for the paper-trading ledger
    #[arg(long, env = "LEDGER_DB_PATH", default_value = "data/paper_trades.db")]
    pub ledger_db_path: String,

    /// SQLite path for the performance tracker
    #[arg(long, env = "PERFORMANCE_DB_PATH", default_value = "data/performance.db")]
    pub performance_db_path: String,

    /// Directory holding daily news/markets/resolutions snapshots
    #[arg(long, env = "HISTORICAL_DIR", default_value = "data/historical")]
    pub historical_dir: String,

    /// Directory for signal/bet/performance journals
    #[arg(long, env = "LOG_DIR", default_value = "data/logs")]
    pub log_dir: String,
}

fn default_news_feeds() -> Vec<String> {
    vec![
        "https://feeds.bbci.co.uk/news/world/rss.xml".to_string(),
        "https://www.reutersagency.com/feed/?best-topics=political-general".to_string(),
    ]
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.initial_bankroll <= 0.0 {
            anyhow::bail!("initial_bankroll must be positive");
        }
        if !(0.0..=1.0).contains(&self.kelly_fraction) {
            anyhow::bail!("kelly_fraction must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.max_bet_pct) {
            anyhow::bail!("max_bet_pct must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.max_daily_loss_pct) {
            anyhow::bail!("max_daily_loss_pct must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.min_edge) {
            anyhow::bail!("min_edge must be between 0.0 and 1.0");
        }
        if !(1..=10).contains(&self.min_confidence) {
            anyhow::bail!("min_confidence must be between 1 and 10");
        }
        if self.trading_mode != TradingMode::Backtest && self.llm_api_key.is_none() {
            anyhow::bail!("LLM_API_KEY is required outside backtest mode");
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn default_for_tests() -> Self {
        Config {
            trading_mode: TradingMode::Paper,
            initial_bankroll: 500.0,
            max_bet_pct: 0.05,
            max_daily_loss_pct: 0.10,
            min_edge: 0.05,
            kelly_fraction: 0.5,
            max_positions: 10,
            max_market_volume_pct: 0.10,
            check_interval_secs: 60,
            market_fetch_limit: 200,
            min_confidence: 6,
            max_markets_per_cycle: 5,
            polymarket_api_url: "https://gamma-api.polymarket.com".into(),
            llm_api_url: "https://api.openai.com/v1".into(),
            llm_api_key: Some("test-key".into()),
            llm_model: "gpt-4o".into(),
            news_feeds: Vec::new(),
            ledger_db_path: ":memory:".into(),
            performance_db_path: ":memory:".into(),
            historical_dir: "data/historical".into(),
            log_dir: "data/logs".into(),
        }
    }
}
