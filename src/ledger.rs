use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::models::{Bet, Direction, Position, Trade, TradeOutcome, TradeStatus};

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bankroll (
    id          INTEGER PRIMARY KEY,
    amount      REAL    NOT NULL,
    updated_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS trades (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp         TEXT    NOT NULL,
    market_id         TEXT    NOT NULL,
    direction         TEXT    NOT NULL,
    amount_usd        REAL    NOT NULL,
    odds_at_execution REAL    NOT NULL,
    shares            REAL    NOT NULL,
    status            TEXT    NOT NULL DEFAULT 'open',
    outcome           TEXT,
    pnl               REAL
);

CREATE TABLE IF NOT EXISTS positions (
    market_id  TEXT PRIMARY KEY,
    direction  TEXT NOT NULL,
    shares     REAL NOT NULL,
    avg_price  REAL NOT NULL,
    opened_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trades_market ON trades(market_id);
CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status);
"#;

/// Paper-trading ledger: single owner of the bankroll, trade history, and
/// open positions. Every mutation (execute, resolve) runs inside one SQL
/// transaction so a failure partway through leaves no partial state.
///
/// State machine per market id:
///   no-position → open (trade rows open, position row exists)
///               → resolved (trades resolved, position deleted)
#[derive(Clone)]
pub struct PaperLedger {
    conn: Arc<Mutex<Connection>>,
}

impl PaperLedger {
    /// Open (or create) the ledger database. Pass `":memory:"` for an
    /// ephemeral ledger (backtesting, tests). Seeds the bankroll row with
    /// `initial_bankroll` on first use only.
    pub fn open(path: &str, initial_bankroll: f64) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
            let conn = Connection::open(path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn
        };
        conn.execute_batch(SCHEMA_SQL)?;

        let ledger = PaperLedger {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.ensure_bankroll(initial_bankroll)?;
        Ok(ledger)
    }

    fn ensure_bankroll(&self, initial_bankroll: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<f64> = conn
            .query_row("SELECT amount FROM bankroll WHERE id = 1", [], |r| r.get(0))
            .optional()?;
        if existing.is_none() {
            conn.execute(
                "INSERT INTO bankroll (id, amount, updated_at) VALUES (1, ?1, ?2)",
                params![initial_bankroll, Utc::now()],
            )?;
        }
        Ok(())
    }

    /// Simulate trade execution: debit the bankroll, log an open trade, and
    /// upsert the market's position.
    ///
    /// Returns `Ok(None)` with no state change when the bet is rejected:
    /// non-positive execution price, insufficient bankroll, or a direction
    /// conflict with an existing position (no hedging in this engine; the
    /// whole operation rolls back).
    pub fn execute(&self, bet: &Bet) -> Result<Option<i64>> {
        let price = bet.odds_at_execution;
        if price <= 0.0 {
            return Ok(None);
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let bankroll: f64 =
            tx.query_row("SELECT amount FROM bankroll WHERE id = 1", [], |r| r.get(0))?;
        if bankroll < bet.amount_usd {
            return Ok(None);
        }

        let shares = bet.amount_usd / price;

        tx.execute(
            "UPDATE bankroll SET amount = amount - ?1, updated_at = ?2 WHERE id = 1",
            params![bet.amount_usd, Utc::now()],
        )?;

        tx.execute(
            "INSERT INTO trades (timestamp, market_id, direction, amount_usd, odds_at_execution, shares)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                bet.timestamp,
                bet.market_id,
                bet.direction.as_str(),
                bet.amount_usd,
                price,
                shares,
            ],
        )?;
        let trade_id = tx.last_insert_rowid();

        let existing: Option<(f64, f64, String)> = tx
            .query_row(
                "SELECT shares, avg_price, direction FROM positions WHERE market_id = ?1",
                params![bet.market_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        match existing {
            None => {
                tx.execute(
                    "INSERT INTO positions (market_id, direction, shares, avg_price, opened_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        bet.market_id,
                        bet.direction.as_str(),
                        shares,
                        price,
                        Utc::now(),
                    ],
                )?;
            }
            Some((existing_shares, existing_avg, existing_direction)) => {
                if existing_direction != bet.direction.as_str() {
                    // One direction per market: dropping the transaction
                    // rolls back the bankroll debit and trade insert.
                    return Ok(None);
                }
                let new_shares = existing_shares + shares;
                let new_avg = (existing_shares * existing_avg + shares * price) / new_shares;
                tx.execute(
                    "UPDATE positions SET shares = ?1, avg_price = ?2 WHERE market_id = ?3",
                    params![new_shares, new_avg, bet.market_id],
                )?;
            }
        }

        tx.commit()?;
        Ok(Some(trade_id))
    }

    /// Settle a market. Pays out `shares` when the position's direction
    /// matches the outcome (the stake was already debited at execution, so
    /// only the payout is credited), stamps every open trade for the market
    /// with its own pnl, and deletes the position row.
    ///
    /// Returns the position-level P&L. A market with no open position is an
    /// idempotent no-op returning 0.
    pub fn resolve(&self, market_id: &str, outcome: Direction) -> Result<f64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let position: Option<(String, f64, f64)> = tx
            .query_row(
                "SELECT direction, shares, avg_price FROM positions WHERE market_id = ?1",
                params![market_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        let Some((direction_raw, shares, avg_price)) = position else {
            return Ok(0.0);
        };
        let direction = Direction::from_str(&direction_raw)
            .with_context(|| format!("corrupt position direction for market {market_id}"))?;

        let cost = shares * avg_price;
        let won = direction == outcome;
        let payout = if won { shares } else { 0.0 };
        let pnl_total = if won { payout - cost } else { -cost };

        tx.execute(
            "UPDATE bankroll SET amount = amount + ?1, updated_at = ?2 WHERE id = 1",
            params![payout, Utc::now()],
        )?;

        // Each trade settles on its own cost basis, not a proportional split
        // of the aggregate.
        let open_trades: Vec<(i64, String, f64, f64)> = {
            let mut stmt = tx.prepare(
                "SELECT id, direction, amount_usd, shares FROM trades
                 WHERE market_id = ?1 AND status = 'open'",
            )?;
            let rows = stmt
                .query_map(params![market_id], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        for (trade_id, trade_direction, trade_amount, trade_shares) in open_trades {
            let trade_won = trade_direction == outcome.as_str();
            let (trade_outcome, trade_pnl) = if trade_won {
                (TradeOutcome::Win, trade_shares - trade_amount)
            } else {
                (TradeOutcome::Lose, -trade_amount)
            };
            tx.execute(
                "UPDATE trades SET status = 'resolved', outcome = ?1, pnl = ?2 WHERE id = ?3",
                params![trade_outcome.as_str(), trade_pnl, trade_id],
            )?;
        }

        tx.execute(
            "DELETE FROM positions WHERE market_id = ?1",
            params![market_id],
        )?;

        tx.commit()?;
        Ok(pnl_total)
    }

    /// Current cash balance.
    pub fn bankroll(&self) -> Result<f64> {
        let conn = self.conn.lock().unwrap();
        let amount: f64 =
            conn.query_row("SELECT amount FROM bankroll WHERE id = 1", [], |r| r.get(0))?;
        Ok(amount)
    }

    /// All open positions. Without live marks the current price defaults to
    /// the average entry price and unrealized P&L reads as 0.
    pub fn positions(&self) -> Result<Vec<Position>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT market_id, direction, shares, avg_price FROM positions")?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, f64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut positions = Vec::with_capacity(rows.len());
        for (market_id, direction_raw, shares, avg_price) in rows {
            let direction = Direction::from_str(&direction_raw)
                .with_context(|| format!("corrupt position direction for market {market_id}"))?;
            positions.push(Position {
                market_id,
                direction,
                shares,
                avg_price,
                current_price: avg_price,
                unrealized_pnl: 0.0,
            });
        }
        Ok(positions)
    }

    /// Trade history in insertion order, optionally filtered by market
    /// and/or status.
    pub fn trades(
        &self,
        market_id: Option<&str>,
        status: Option<TradeStatus>,
    ) -> Result<Vec<Trade>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(market_id) = market_id.as_ref() {
            clauses.push("market_id = ?");
            params_vec.push(market_id);
        }
        let status_str = status.map(|s| s.as_str());
        if let Some(status_str) = status_str.as_ref() {
            clauses.push("status = ?");
            params_vec.push(status_str);
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, timestamp, market_id, direction, amount_usd, odds_at_execution,
                    shares, status, outcome, pnl
             FROM trades {where_clause} ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map(params_vec.as_slice(), map_trade_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            trades.push(row_to_trade(row)?);
        }
        Ok(trades)
    }
}

type TradeRow = (
    i64,
    chrono::DateTime<Utc>,
    String,
    String,
    f64,
    f64,
    f64,
    String,
    Option<String>,
    Option<f64>,
);

fn map_trade_row(row: &rusqlite::Row) -> rusqlite::Result<TradeRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn row_to_trade(row: TradeRow) -> Result<Trade> {
    let (id, timestamp, market_id, direction, amount_usd, odds, shares, status, outcome, pnl) = row;
    let outcome = match outcome.as_deref() {
        Some("win") => Some(TradeOutcome::Win),
        Some("lose") => Some(TradeOutcome::Lose),
        Some(other) => anyhow::bail!("unknown trade outcome {:?}", other),
        None => None,
    };
    Ok(Trade {
        id,
        timestamp,
        market_id,
        direction: Direction::from_str(&direction).map_err(anyhow::Error::from)?,
        amount_usd,
        odds_at_execution: odds,
        shares,
        status: TradeStatus::from_str(&status)?,
        outcome,
        pnl,
    })
}
