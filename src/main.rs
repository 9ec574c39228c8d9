use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;

mod backtest;
mod bot;
mod config;
mod journal;
mod ledger;
mod llm;
mod marketdata;
mod models;
mod news;
mod performance;
mod polymarket;
mod snapshot;
mod strategy;

use backtest::BacktestRunner;
use bot::AgentLoop;
use config::Config;
use llm::LlmClient;
use strategy::NewsSpeedStrategy;

/// News-driven prediction-market trading bot
#[derive(Parser, Debug)]
#[command(name = "polynews-bot", version, about)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent loop continuously
    Run,
    /// Run exactly one sense→think→act→track iteration
    Tick,
    /// Replay recorded snapshots over a date range
    Backtest {
        /// First day to replay (YYYY-MM-DD)
        #[arg(long)]
        start_date: NaiveDate,
        /// Last day to replay, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end_date: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config;
    config.validate()?;

    match cli.command {
        Command::Run => {
            let mut agent = AgentLoop::new(config)?;
            agent.run().await
        }
        Command::Tick => {
            let mut agent = AgentLoop::new(config)?;
            agent.tick().await
        }
        Command::Backtest {
            start_date,
            end_date,
        } => {
            if end_date < start_date {
                anyhow::bail!("end_date must not precede start_date");
            }
            let api_key = config
                .llm_api_key
                .as_deref()
                .context("LLM_API_KEY is required to generate signals in a backtest")?;
            let llm = LlmClient::new(&config.llm_api_url, api_key, &config.llm_model)?;
            let strategy = NewsSpeedStrategy::new(
                llm,
                config.min_edge,
                config.min_confidence,
                config.max_markets_per_cycle,
            );
            let runner = BacktestRunner::new(
                strategy,
                start_date,
                end_date,
                config.historical_dir.clone(),
                &config,
            );
            let result = runner.run().await?;

            info!(
                "Backtest complete: {} trades, pnl {:.2}, win rate {:.1}%, sharpe {:.2}, max drawdown {:.1}%",
                result.num_trades,
                result.total_pnl,
                result.win_rate * 100.0,
                result.sharpe_ratio,
                result.max_drawdown * 100.0
            );
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
