//! Quote feed seam.
//!
//! The network client that actually downloads end-of-day closes lives
//! outside this engine. This module defines the trait it must satisfy,
//! the report type gap-filling produces, and a deterministic fixture
//! implementation backed by an in-memory table or CSV files on disk —
//! the implementation the tests and the console's "fixture" provider use.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A source of adjusted end-of-day closes.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    /// The adjusted close for one symbol on one date. `Ok(None)` means
    /// the source has no close for that day (halt, late publication);
    /// `Err` means the fetch itself failed.
    async fn close_on(&self, symbol: &str, date: NaiveDate) -> Result<Option<Decimal>>;
}

// ---------------------------------------------------------------------------
// Sync reporting
// ---------------------------------------------------------------------------

/// One (symbol, date) the feed could not supply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub symbol: String,
    pub date: NaiveDate,
    pub reason: String,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.symbol, self.date, self.reason)
    }
}

/// Outcome of one gap-filling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// (symbol, trading day) pairs examined.
    pub attempted: u32,
    /// Newly fetched and stored.
    pub fetched: u32,
    /// Already present, left untouched.
    pub skipped: u32,
    pub failed: Vec<FetchFailure>,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempted, {} fetched, {} skipped, {} failed",
            self.attempted,
            self.fetched,
            self.skipped,
            self.failed.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// FixtureFeed
// ---------------------------------------------------------------------------

/// Deterministic feed over a fixed table of closes. Built inline for
/// tests or loaded from a directory of `SYMBOL.csv` files holding
/// `date,close` lines.
#[derive(Debug, Default)]
pub struct FixtureFeed {
    closes: HashMap<(String, NaiveDate), Decimal>,
    fail_on: HashSet<(String, NaiveDate)>,
}

impl FixtureFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_close(mut self, symbol: &str, date: NaiveDate, close: Decimal) -> Self {
        self.closes.insert((symbol.to_string(), date), close);
        self
    }

    /// Register a (symbol, date) whose fetch errors out, for exercising
    /// failure reporting.
    pub fn with_failure(mut self, symbol: &str, date: NaiveDate) -> Self {
        self.fail_on.insert((symbol.to_string(), date));
        self
    }

    /// Load every `*.csv` in `dir`; the file stem is the symbol, each
    /// line is `YYYY-MM-DD,close`. Blank lines and `#` comments allowed.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut feed = Self::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read fixture dir: {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(symbol) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let symbol = symbol.to_uppercase();
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read fixture file: {}", path.display()))?;
            for (lineno, line) in contents.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let (date_str, close_str) = line.split_once(',').with_context(|| {
                    format!("{}:{}: expected 'date,close'", path.display(), lineno + 1)
                })?;
                let date = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
                    .with_context(|| format!("{}:{}: bad date", path.display(), lineno + 1))?;
                let close = Decimal::from_str(close_str.trim())
                    .with_context(|| format!("{}:{}: bad close", path.display(), lineno + 1))?;
                feed.closes.insert((symbol.clone(), date), close);
            }
        }
        Ok(feed)
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }
}

#[async_trait]
impl QuoteFeed for FixtureFeed {
    async fn close_on(&self, symbol: &str, date: NaiveDate) -> Result<Option<Decimal>> {
        let key = (symbol.to_string(), date);
        if self.fail_on.contains(&key) {
            bail!("simulated fetch failure for {symbol} {date}");
        }
        Ok(self.closes.get(&key).copied())
    }
}
