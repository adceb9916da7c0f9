//! Daily scoring.
//!
//! Points are a pure function of the move log, the frozen instrument
//! set, and the price ledger, so the same inputs always produce the
//! same output down to the last decimal place. All published figures
//! carry four decimal places, rounded half-away-from-zero; the rule is
//! applied per symbol first and again to the sum, so a recomputed total
//! always matches the cached one bit for bit.
//!
//! A symbol without a usable close (no bar today, no bar on the prior
//! trading day, or a zero prior close) contributes zero and is listed
//! under `missing` — a data gap is a degradation, never an error.

pub mod cache;

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use tracing::debug;

use crate::calendar::TradingCalendar;
use crate::roster;
use crate::store::Store;
use crate::types::{DayScore, HoldingSet, InstrumentSet, Season, SettleError, SymbolScore};

/// Decimal places carried by every published score figure.
pub const SCORE_DP: u32 = 4;

/// Round to [`SCORE_DP`] places, midpoints away from zero.
pub fn round4(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCORE_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Close quotes for one scoring date: symbol → (close, previous close).
pub type DayQuotes = HashMap<String, (Option<Decimal>, Option<Decimal>)>;

// ---------------------------------------------------------------------------
// Pure core
// ---------------------------------------------------------------------------

/// Score one holding from its pair of closes. `None` when the symbol
/// cannot be scored and belongs on the missing list.
fn score_symbol(
    symbol: &str,
    acquired: NaiveDate,
    date: NaiveDate,
    close: Option<Decimal>,
    prev_close: Option<Decimal>,
    season: &Season,
) -> Option<SymbolScore> {
    let close = close?;
    let prev_close = prev_close?;
    if prev_close.is_zero() {
        return None;
    }
    let day_return = (close - prev_close) / prev_close;
    let first_day = acquired == date;
    let mut points = day_return * Decimal::ONE_HUNDRED * season.score_multiplier;
    if first_day {
        points *= season.first_day_factor;
    }
    Some(SymbolScore {
        symbol: symbol.to_string(),
        close,
        prev_close,
        day_return: round4(day_return),
        points: round4(points),
        first_day,
    })
}

/// Fold a holding set and its quotes into a [`DayScore`].
///
/// Breakdown order follows the holding set (alphabetical by symbol),
/// so recomputation reproduces the stored row exactly.
pub fn score_holdings(
    team_id: i64,
    date: NaiveDate,
    holdings: &HoldingSet,
    quotes: &DayQuotes,
    season: &Season,
    computed_at: DateTime<Utc>,
) -> DayScore {
    let mut breakdown = Vec::new();
    let mut missing = Vec::new();
    for holding in holdings.values() {
        let (close, prev_close) = quotes
            .get(&holding.symbol)
            .copied()
            .unwrap_or((None, None));
        match score_symbol(&holding.symbol, holding.acquired, date, close, prev_close, season) {
            Some(scored) => breakdown.push(scored),
            None => missing.push(holding.symbol.clone()),
        }
    }
    let total = round4(breakdown.iter().map(|s| s.points).sum());
    DayScore {
        team_id,
        date,
        total,
        breakdown,
        missing,
        is_trading_day: true,
        computed_at,
    }
}

// ---------------------------------------------------------------------------
// Async shell
// ---------------------------------------------------------------------------

/// Computes day scores from stored facts. Stateless between calls;
/// caching is [`cache::ScoreCache`]'s job.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    store: Store,
    calendar: TradingCalendar,
}

impl ScoringEngine {
    pub fn new(store: Store, calendar: TradingCalendar) -> Self {
        Self { store, calendar }
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    /// One team's score for one date, computed from scratch.
    ///
    /// Non-trading dates short-circuit to the flagged zero score before
    /// any holdings work happens.
    pub async fn day_score(&self, team_id: i64, date: NaiveDate) -> Result<DayScore, SettleError> {
        // Microseconds, the precision timestamps survive storage with.
        let computed_at = Utc::now().trunc_subsecs(6);
        if !self.calendar.is_trading_day(date) {
            return Ok(DayScore::non_trading(team_id, date, computed_at));
        }

        let team = self.store.team(team_id).await?;
        let league = self.store.league(team.league_id).await?;
        let season = self.store.season(league.season_id).await?;
        let instruments = InstrumentSet::new(self.store.instruments(season.id).await?);
        let moves = self.store.moves_for_team(team_id).await?;
        let holdings = roster::holdings_at(&moves, &instruments, date);

        let prev = self.calendar.prev_trading_day(date);
        let mut quotes = DayQuotes::new();
        for symbol in holdings.keys() {
            let close = self.store.price(symbol, date).await?.map(|bar| bar.close);
            let prev_close = self.store.price(symbol, prev).await?.map(|bar| bar.close);
            quotes.insert(symbol.clone(), (close, prev_close));
        }

        let score = score_holdings(team_id, date, &holdings, &quotes, &season, computed_at);
        debug!(
            team_id,
            date = %date,
            total = %score.total,
            scored = score.breakdown.len(),
            missing = score.missing.len(),
            "computed day score"
        );
        Ok(score)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
