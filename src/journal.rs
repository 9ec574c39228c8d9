use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::{Bet, PerformanceMetrics, Signal};

/// Append-only activity journal, separate from the ledger database. Signals
/// and bets go to per-day JSONL files; the performance summary is one JSON
/// array that grows over time. Meant for eyeballing and ad-hoc analysis,
/// never read back by the bot itself.
pub struct Journal {
    signals_dir: PathBuf,
    bets_dir: PathBuf,
    performance_dir: PathBuf,
}

impl Journal {
    pub fn new(log_dir: impl AsRef<Path>) -> Result<Self> {
        let base = log_dir.as_ref();
        let journal = Journal {
            signals_dir: base.join("signals"),
            bets_dir: base.join("bets"),
            performance_dir: base.join("performance"),
        };
        for dir in [
            &journal.signals_dir,
            &journal.bets_dir,
            &journal.performance_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
        }
        Ok(journal)
    }

    /// Record a signal together with what happened to it ("executed" or a
    /// rejection reason).
    pub fn log_signal(&self, signal: &Signal, verdict: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Entry<'a> {
            #[serde(flatten)]
            signal: &'a Signal,
            verdict: &'a str,
        }
        self.append_jsonl(&self.signals_dir, &Entry { signal, verdict })
    }

    pub fn log_bet(&self, bet: &Bet) -> Result<()> {
        self.append_jsonl(&self.bets_dir, bet)
    }

    /// Append a metrics snapshot to the running summary array.
    pub fn log_performance(&self, metrics: &PerformanceMetrics) -> Result<()> {
        let path = self.performance_dir.join("daily_summary.json");
        let mut entries: Vec<serde_json::Value> = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        entries.push(serde_json::to_value(metrics)?);
        fs::write(&path, serde_json::to_string_pretty(&entries)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn append_jsonl<T: Serialize>(&self, dir: &Path, entry: &T) -> Result<()> {
        let path = dir.join(format!("{}.jsonl", Utc::now().date_naive()));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        Ok(())
    }
}
