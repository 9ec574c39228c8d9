use anyhow::Result;
use async_trait::async_trait;

use crate::marketdata::MarketRecord;
use crate::models::Signal;
use crate::news::NewsArticle;

mod news_speed;

pub use news_speed::NewsSpeedStrategy;

/// A producer of trading signals. Both the live LLM-backed strategy and any
/// backtest/test stub implement this; the decision pipeline depends only on
/// the output shape.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    /// Analyze fresh articles against the current market set and emit zero
    /// or more signals.
    async fn generate_signals(
        &self,
        articles: &[NewsArticle],
        markets: &[MarketRecord],
    ) -> Result<Vec<Signal>>;
}
