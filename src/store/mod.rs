//! SQLite persistence for the settlement engine.
//!
//! A single [`Store`] wraps a `sqlx` pool and owns the schema, the row
//! mapping and every multi-row transaction. Engines above it never touch
//! SQL. Conventions, applied uniformly:
//!
//! - Decimals cross the boundary as TEXT (`Decimal::to_string` /
//!   `from_str`) so no value ever passes through a float.
//! - Dates are `%Y-%m-%d` TEXT; timestamps are fixed-width RFC 3339 UTC
//!   with microseconds, so lexicographic order equals chronological
//!   order and window queries can compare strings.
//! - Schema is created idempotently at open (`CREATE TABLE IF NOT
//!   EXISTS`); file databases run in WAL mode.
//! - Roster moves are append-only: there is no update or delete path for
//!   them anywhere in this module.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{
    CalendarDay, ClaimStatus, DayScore, Instrument, League, LeagueMode, LeaguePhase, MoveKind,
    PriceBar, RosterMove, Season, SettleError, SymbolScore, TIER_MAX, TIER_MIN, Team,
    TradeProposal, TradeStatus, WaiverClaim,
};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the engine's SQLite database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) a file-backed store in WAL mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SettleError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!(path = %path.as_ref().display(), "store opened");
        Ok(store)
    }

    /// Open an in-memory store. The pool is pinned to a single eternal
    /// connection: every SQLite `:memory:` connection is its own empty
    /// database, so a second connection would see no schema.
    pub async fn open_in_memory() -> Result<Self, SettleError> {
        let options: SqliteConnectOptions = "sqlite::memory:".parse()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), SettleError> {
        const DDL: &[&str] = &[
            "CREATE TABLE IF NOT EXISTS seasons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                start_date TEXT NOT NULL,
                trade_deadline TEXT NOT NULL,
                budget_cap TEXT NOT NULL,
                score_multiplier TEXT NOT NULL,
                first_day_factor TEXT NOT NULL,
                max_swaps_per_day INTEGER NOT NULL,
                max_swaps_per_week INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS leagues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                season_id INTEGER NOT NULL REFERENCES seasons(id),
                name TEXT NOT NULL,
                mode TEXT NOT NULL,
                phase TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS teams (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                league_id INTEGER NOT NULL REFERENCES leagues(id),
                name TEXT NOT NULL,
                budget_remaining TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS instruments (
                season_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                tier INTEGER NOT NULL,
                tier_cost TEXT NOT NULL,
                PRIMARY KEY (season_id, symbol)
            )",
            "CREATE TABLE IF NOT EXISTS roster_moves (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                kind TEXT NOT NULL,
                detail TEXT NOT NULL,
                effective_date TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_moves_team_replay
                ON roster_moves (team_id, effective_date, created_at, id)",
            "CREATE TABLE IF NOT EXISTS prices (
                symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                close TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                PRIMARY KEY (symbol, date)
            )",
            "CREATE TABLE IF NOT EXISTS day_scores (
                team_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                total TEXT NOT NULL,
                breakdown TEXT NOT NULL,
                missing TEXT NOT NULL,
                is_trading_day INTEGER NOT NULL,
                computed_at TEXT NOT NULL,
                PRIMARY KEY (team_id, date)
            )",
            "CREATE TABLE IF NOT EXISTS waiver_claims (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                add_symbol TEXT NOT NULL,
                drop_symbol TEXT NOT NULL,
                bid TEXT NOT NULL,
                status TEXT NOT NULL,
                effective_date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                resolved_at TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_claims_status_eff
                ON waiver_claims (status, effective_date)",
            "CREATE TABLE IF NOT EXISTS trade_proposals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                league_id INTEGER NOT NULL,
                from_team INTEGER NOT NULL,
                to_team INTEGER NOT NULL,
                offered TEXT NOT NULL,
                requested TEXT NOT NULL,
                status TEXT NOT NULL,
                effective_date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                responded_at TEXT
            )",
            "CREATE TABLE IF NOT EXISTS calendar_days (
                date TEXT PRIMARY KEY,
                is_trading INTEGER NOT NULL,
                prev_trading TEXT NOT NULL,
                next_trading TEXT NOT NULL
            )",
        ];
        for stmt in DDL {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Seasons
    // -----------------------------------------------------------------------

    /// Insert a season; the `id` field of the argument is ignored and the
    /// stored row (with its assigned id) is returned.
    pub async fn create_season(&self, season: &Season) -> Result<Season, SettleError> {
        let result = sqlx::query(
            "INSERT INTO seasons (name, start_date, trade_deadline, budget_cap,
                score_multiplier, first_day_factor, max_swaps_per_day, max_swaps_per_week)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&season.name)
        .bind(date_str(season.start_date))
        .bind(date_str(season.trade_deadline))
        .bind(season.budget_cap.to_string())
        .bind(season.score_multiplier.to_string())
        .bind(season.first_day_factor.to_string())
        .bind(season.max_swaps_per_day as i64)
        .bind(season.max_swaps_per_week as i64)
        .execute(&self.pool)
        .await?;
        let mut stored = season.clone();
        stored.id = result.last_insert_rowid();
        Ok(stored)
    }

    pub async fn season(&self, id: i64) -> Result<Season, SettleError> {
        let row = sqlx::query("SELECT * FROM seasons WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| season_from_row(&r))
            .transpose()?
            .ok_or_else(|| SettleError::not_found("season", id))
    }

    // -----------------------------------------------------------------------
    // Leagues & teams
    // -----------------------------------------------------------------------

    pub async fn create_league(
        &self,
        season_id: i64,
        name: &str,
        mode: LeagueMode,
    ) -> Result<League, SettleError> {
        let result = sqlx::query(
            "INSERT INTO leagues (season_id, name, mode, phase) VALUES (?, ?, ?, ?)",
        )
        .bind(season_id)
        .bind(name)
        .bind(mode.as_str())
        .bind(LeaguePhase::Setup.as_str())
        .execute(&self.pool)
        .await?;
        Ok(League {
            id: result.last_insert_rowid(),
            season_id,
            name: name.to_string(),
            mode,
            phase: LeaguePhase::Setup,
        })
    }

    pub async fn league(&self, id: i64) -> Result<League, SettleError> {
        let row = sqlx::query("SELECT * FROM leagues WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| league_from_row(&r))
            .transpose()?
            .ok_or_else(|| SettleError::not_found("league", id))
    }

    pub async fn set_league_phase(&self, id: i64, phase: LeaguePhase) -> Result<(), SettleError> {
        let result = sqlx::query("UPDATE leagues SET phase = ? WHERE id = ?")
            .bind(phase.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SettleError::not_found("league", id));
        }
        Ok(())
    }

    pub async fn create_team(
        &self,
        league_id: i64,
        name: &str,
        budget: Decimal,
    ) -> Result<Team, SettleError> {
        let result =
            sqlx::query("INSERT INTO teams (league_id, name, budget_remaining) VALUES (?, ?, ?)")
                .bind(league_id)
                .bind(name)
                .bind(budget.to_string())
                .execute(&self.pool)
                .await?;
        Ok(Team {
            id: result.last_insert_rowid(),
            league_id,
            name: name.to_string(),
            budget_remaining: budget,
        })
    }

    pub async fn team(&self, id: i64) -> Result<Team, SettleError> {
        let row = sqlx::query("SELECT * FROM teams WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| team_from_row(&r))
            .transpose()?
            .ok_or_else(|| SettleError::not_found("team", id))
    }

    pub async fn teams_in_league(&self, league_id: i64) -> Result<Vec<Team>, SettleError> {
        let rows = sqlx::query("SELECT * FROM teams WHERE league_id = ? ORDER BY id")
            .bind(league_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(team_from_row).collect()
    }

    // -----------------------------------------------------------------------
    // Instruments (frozen per season)
    // -----------------------------------------------------------------------

    /// Populate a season's instrument universe. Refused once populated:
    /// tiers and costs are frozen for the life of the season.
    pub async fn populate_instruments(
        &self,
        season_id: i64,
        instruments: &[Instrument],
    ) -> Result<u32, SettleError> {
        for inst in instruments {
            if !(TIER_MIN..=TIER_MAX).contains(&inst.tier) {
                return Err(SettleError::validation(format!(
                    "instrument {} has tier {}, expected {TIER_MIN}-{TIER_MAX}",
                    inst.symbol, inst.tier
                )));
            }
        }
        let mut tx = self.pool.begin().await?;
        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM instruments WHERE season_id = ?")
                .bind(season_id)
                .fetch_one(&mut *tx)
                .await?;
        if existing > 0 {
            return Err(SettleError::validation(format!(
                "season {season_id} already has {existing} instruments; tiers are frozen"
            )));
        }
        for inst in instruments {
            sqlx::query(
                "INSERT INTO instruments (season_id, symbol, tier, tier_cost) VALUES (?, ?, ?, ?)",
            )
            .bind(season_id)
            .bind(&inst.symbol)
            .bind(inst.tier as i64)
            .bind(inst.tier_cost.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(season_id, count = instruments.len(), "instruments populated");
        Ok(instruments.len() as u32)
    }

    pub async fn instruments(&self, season_id: i64) -> Result<Vec<Instrument>, SettleError> {
        let rows = sqlx::query("SELECT * FROM instruments WHERE season_id = ? ORDER BY symbol")
            .bind(season_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(instrument_from_row).collect()
    }

    // -----------------------------------------------------------------------
    // Roster moves (append-only)
    // -----------------------------------------------------------------------

    /// Append one move, returning it with its assigned id.
    pub async fn append_move(&self, mv: &RosterMove) -> Result<RosterMove, SettleError> {
        let mut tx = self.pool.begin().await?;
        let stored = insert_move(&mut tx, mv).await?;
        tx.commit().await?;
        Ok(stored)
    }

    /// Append several moves in one transaction — a swap's paired
    /// drop+add, or a trade's full set of legs. All or nothing.
    pub async fn append_moves(&self, moves: &[RosterMove]) -> Result<Vec<RosterMove>, SettleError> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(moves.len());
        for mv in moves {
            stored.push(insert_move(&mut tx, mv).await?);
        }
        tx.commit().await?;
        Ok(stored)
    }

    /// A team's full move log in replay order.
    pub async fn moves_for_team(&self, team_id: i64) -> Result<Vec<RosterMove>, SettleError> {
        let rows = sqlx::query(
            "SELECT * FROM roster_moves WHERE team_id = ?
             ORDER BY effective_date, created_at, id",
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(move_from_row).collect()
    }

    /// Every move of every team in a league, in replay order.
    pub async fn moves_for_league(&self, league_id: i64) -> Result<Vec<RosterMove>, SettleError> {
        let rows = sqlx::query(
            "SELECT m.* FROM roster_moves m
             JOIN teams t ON m.team_id = t.id
             WHERE t.league_id = ?
             ORDER BY m.effective_date, m.created_at, m.id",
        )
        .bind(league_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(move_from_row).collect()
    }

    /// A team's moves created in `[from, to)`. Relies on the fixed-width
    /// timestamp encoding for string comparison.
    pub async fn moves_created_between(
        &self,
        team_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RosterMove>, SettleError> {
        let rows = sqlx::query(
            "SELECT * FROM roster_moves
             WHERE team_id = ? AND created_at >= ? AND created_at < ?
             ORDER BY effective_date, created_at, id",
        )
        .bind(team_id)
        .bind(ts_str(from))
        .bind(ts_str(to))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(move_from_row).collect()
    }

    // -----------------------------------------------------------------------
    // Prices
    // -----------------------------------------------------------------------

    /// Upsert one close. Re-upserting the same key overwrites the value
    /// and always refreshes `fetched_at`.
    pub async fn upsert_price(&self, bar: &PriceBar) -> Result<(), SettleError> {
        sqlx::query(
            "INSERT INTO prices (symbol, date, close, fetched_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(symbol, date) DO UPDATE SET
                close = excluded.close,
                fetched_at = excluded.fetched_at",
        )
        .bind(&bar.symbol)
        .bind(date_str(bar.date))
        .bind(bar.close.to_string())
        .bind(ts_str(bar.fetched_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn price(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<PriceBar>, SettleError> {
        let row = sqlx::query("SELECT * FROM prices WHERE symbol = ? AND date = ?")
            .bind(symbol)
            .bind(date_str(date))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| price_from_row(&r)).transpose()
    }

    /// Dates in `[from, to]` for which a close is stored, ascending.
    pub async fn price_dates(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>, SettleError> {
        let rows = sqlx::query(
            "SELECT date FROM prices WHERE symbol = ? AND date >= ? AND date <= ? ORDER BY date",
        )
        .bind(symbol)
        .bind(date_str(from))
        .bind(date_str(to))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| parse_date(&r.try_get::<String, _>("date")?))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Day-score cache
    // -----------------------------------------------------------------------

    /// Upsert a computed day score — one row per (team, date), never
    /// appended.
    pub async fn upsert_day_score(&self, score: &DayScore) -> Result<(), SettleError> {
        sqlx::query(
            "INSERT INTO day_scores (team_id, date, total, breakdown, missing,
                is_trading_day, computed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(team_id, date) DO UPDATE SET
                total = excluded.total,
                breakdown = excluded.breakdown,
                missing = excluded.missing,
                is_trading_day = excluded.is_trading_day,
                computed_at = excluded.computed_at",
        )
        .bind(score.team_id)
        .bind(date_str(score.date))
        .bind(score.total.to_string())
        .bind(serde_json::to_string(&score.breakdown)?)
        .bind(serde_json::to_string(&score.missing)?)
        .bind(score.is_trading_day)
        .bind(ts_str(score.computed_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn day_score(
        &self,
        team_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DayScore>, SettleError> {
        let row = sqlx::query("SELECT * FROM day_scores WHERE team_id = ? AND date = ?")
            .bind(team_id)
            .bind(date_str(date))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| day_score_from_row(&r)).transpose()
    }

    /// Delete cached scores matching the optional filters; returns the
    /// number of rows removed. Cache rows only — facts are untouched.
    pub async fn delete_day_scores(
        &self,
        team_id: Option<i64>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<u64, SettleError> {
        let mut sql = String::from("DELETE FROM day_scores WHERE 1=1");
        if team_id.is_some() {
            sql.push_str(" AND team_id = ?");
        }
        if from.is_some() {
            sql.push_str(" AND date >= ?");
        }
        if to.is_some() {
            sql.push_str(" AND date <= ?");
        }
        let mut query = sqlx::query(&sql);
        if let Some(t) = team_id {
            query = query.bind(t);
        }
        if let Some(f) = from {
            query = query.bind(date_str(f));
        }
        if let Some(t) = to {
            query = query.bind(date_str(t));
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    // -----------------------------------------------------------------------
    // Waiver claims
    // -----------------------------------------------------------------------

    pub async fn create_claim(&self, claim: &WaiverClaim) -> Result<WaiverClaim, SettleError> {
        let result = sqlx::query(
            "INSERT INTO waiver_claims (team_id, add_symbol, drop_symbol, bid, status,
                effective_date, created_at, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(claim.team_id)
        .bind(&claim.add_symbol)
        .bind(&claim.drop_symbol)
        .bind(claim.bid.to_string())
        .bind(claim.status.as_str())
        .bind(date_str(claim.effective_date))
        .bind(ts_str(claim.created_at))
        .bind(claim.resolved_at.map(ts_str))
        .execute(&self.pool)
        .await?;
        let mut stored = claim.clone();
        stored.id = result.last_insert_rowid();
        Ok(stored)
    }

    pub async fn claim(&self, id: i64) -> Result<WaiverClaim, SettleError> {
        let row = sqlx::query("SELECT * FROM waiver_claims WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| claim_from_row(&r))
            .transpose()?
            .ok_or_else(|| SettleError::not_found("claim", id))
    }

    pub async fn set_claim_status(
        &self,
        id: i64,
        status: ClaimStatus,
        resolved_at: Option<DateTime<Utc>>,
    ) -> Result<(), SettleError> {
        let result =
            sqlx::query("UPDATE waiver_claims SET status = ?, resolved_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(resolved_at.map(ts_str))
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(SettleError::not_found("claim", id));
        }
        Ok(())
    }

    /// PENDING claims of a league for one effective date, in submission
    /// order (created_at, then id).
    pub async fn pending_claims_for_date(
        &self,
        league_id: i64,
        effective_date: NaiveDate,
    ) -> Result<Vec<WaiverClaim>, SettleError> {
        let rows = sqlx::query(
            "SELECT c.* FROM waiver_claims c
             JOIN teams t ON c.team_id = t.id
             WHERE t.league_id = ? AND c.status = ? AND c.effective_date = ?
             ORDER BY c.created_at, c.id",
        )
        .bind(league_id)
        .bind(ClaimStatus::Pending.as_str())
        .bind(date_str(effective_date))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(claim_from_row).collect()
    }

    /// A team's claims created in `[from, to)`, any status.
    pub async fn claims_created_between(
        &self,
        team_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WaiverClaim>, SettleError> {
        let rows = sqlx::query(
            "SELECT * FROM waiver_claims
             WHERE team_id = ? AND created_at >= ? AND created_at < ?
             ORDER BY created_at, id",
        )
        .bind(team_id)
        .bind(ts_str(from))
        .bind(ts_str(to))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(claim_from_row).collect()
    }

    /// Apply a full waiver resolution atomically: claim verdicts, the
    /// winners' roster moves and the winners' budget deductions all land
    /// in one transaction or not at all.
    pub async fn apply_waiver_resolution(
        &self,
        resolved_at: DateTime<Utc>,
        won: &[i64],
        lost: &[i64],
        moves: &[RosterMove],
        budgets: &[(i64, Decimal)],
    ) -> Result<(), SettleError> {
        let mut tx = self.pool.begin().await?;
        for claim_id in won {
            sqlx::query("UPDATE waiver_claims SET status = ?, resolved_at = ? WHERE id = ?")
                .bind(ClaimStatus::Won.as_str())
                .bind(ts_str(resolved_at))
                .bind(claim_id)
                .execute(&mut *tx)
                .await?;
        }
        for claim_id in lost {
            sqlx::query("UPDATE waiver_claims SET status = ?, resolved_at = ? WHERE id = ?")
                .bind(ClaimStatus::Lost.as_str())
                .bind(ts_str(resolved_at))
                .bind(claim_id)
                .execute(&mut *tx)
                .await?;
        }
        for mv in moves {
            insert_move(&mut tx, mv).await?;
        }
        for (team_id, budget) in budgets {
            sqlx::query("UPDATE teams SET budget_remaining = ? WHERE id = ?")
                .bind(budget.to_string())
                .bind(team_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Trade proposals
    // -----------------------------------------------------------------------

    pub async fn create_proposal(
        &self,
        proposal: &TradeProposal,
    ) -> Result<TradeProposal, SettleError> {
        let result = sqlx::query(
            "INSERT INTO trade_proposals (league_id, from_team, to_team, offered, requested,
                status, effective_date, created_at, responded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(proposal.league_id)
        .bind(proposal.from_team)
        .bind(proposal.to_team)
        .bind(serde_json::to_string(&proposal.offered)?)
        .bind(serde_json::to_string(&proposal.requested)?)
        .bind(proposal.status.as_str())
        .bind(date_str(proposal.effective_date))
        .bind(ts_str(proposal.created_at))
        .bind(proposal.responded_at.map(ts_str))
        .execute(&self.pool)
        .await?;
        let mut stored = proposal.clone();
        stored.id = result.last_insert_rowid();
        Ok(stored)
    }

    pub async fn proposal(&self, id: i64) -> Result<TradeProposal, SettleError> {
        let row = sqlx::query("SELECT * FROM trade_proposals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| proposal_from_row(&r))
            .transpose()?
            .ok_or_else(|| SettleError::not_found("trade proposal", id))
    }

    pub async fn set_proposal_status(
        &self,
        id: i64,
        status: TradeStatus,
        responded_at: Option<DateTime<Utc>>,
    ) -> Result<(), SettleError> {
        let result =
            sqlx::query("UPDATE trade_proposals SET status = ?, responded_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(responded_at.map(ts_str))
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(SettleError::not_found("trade proposal", id));
        }
        Ok(())
    }

    pub async fn pending_proposals(&self, league_id: i64) -> Result<Vec<TradeProposal>, SettleError> {
        let rows = sqlx::query(
            "SELECT * FROM trade_proposals WHERE league_id = ? AND status = ?
             ORDER BY created_at, id",
        )
        .bind(league_id)
        .bind(TradeStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(proposal_from_row).collect()
    }

    /// Accept a trade atomically: mark it ACCEPTED and append every leg's
    /// move in the same transaction.
    pub async fn commit_trade(
        &self,
        proposal_id: i64,
        responded_at: DateTime<Utc>,
        moves: &[RosterMove],
    ) -> Result<(), SettleError> {
        let mut tx = self.pool.begin().await?;
        let result =
            sqlx::query("UPDATE trade_proposals SET status = ?, responded_at = ? WHERE id = ?")
                .bind(TradeStatus::Accepted.as_str())
                .bind(ts_str(responded_at))
                .bind(proposal_id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(SettleError::not_found("trade proposal", proposal_id));
        }
        for mv in moves {
            insert_move(&mut tx, mv).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Expire the given proposals in one transaction. The PENDING guard
    /// in the statement makes re-running harmless.
    pub async fn expire_proposals(
        &self,
        ids: &[i64],
        responded_at: DateTime<Utc>,
    ) -> Result<u64, SettleError> {
        let mut tx = self.pool.begin().await?;
        let mut expired = 0u64;
        for id in ids {
            let result = sqlx::query(
                "UPDATE trade_proposals SET status = ?, responded_at = ?
                 WHERE id = ? AND status = ?",
            )
            .bind(TradeStatus::Expired.as_str())
            .bind(ts_str(responded_at))
            .bind(id)
            .bind(TradeStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;
            expired += result.rows_affected();
        }
        tx.commit().await?;
        Ok(expired)
    }

    // -----------------------------------------------------------------------
    // Calendar materialization
    // -----------------------------------------------------------------------

    /// Replace the stored classification for one year. Idempotent: the
    /// year's rows are deleted and rewritten in a single transaction.
    pub async fn replace_calendar_year(
        &self,
        year: i32,
        rows: &[CalendarDay],
    ) -> Result<(), SettleError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM calendar_days WHERE date >= ? AND date <= ?")
            .bind(format!("{year:04}-01-01"))
            .bind(format!("{year:04}-12-31"))
            .execute(&mut *tx)
            .await?;
        for day in rows {
            sqlx::query(
                "INSERT INTO calendar_days (date, is_trading, prev_trading, next_trading)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(date_str(day.date))
            .bind(day.is_trading)
            .bind(date_str(day.prev_trading))
            .bind(date_str(day.next_trading))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn calendar_day(&self, date: NaiveDate) -> Result<Option<CalendarDay>, SettleError> {
        let row = sqlx::query("SELECT * FROM calendar_days WHERE date = ?")
            .bind(date_str(date))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| calendar_day_from_row(&r)).transpose()
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn date_str(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn parse_date(s: &str) -> Result<NaiveDate, SettleError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| SettleError::Corrupt(format!("bad date {s:?}: {e}")))
}

/// Fixed-width RFC 3339 with microseconds so string order is time order.
fn ts_str(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, SettleError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SettleError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

fn parse_dec(s: &str) -> Result<Decimal, SettleError> {
    Decimal::from_str(s).map_err(|e| SettleError::Corrupt(format!("bad decimal {s:?}: {e}")))
}

async fn insert_move(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    mv: &RosterMove,
) -> Result<RosterMove, SettleError> {
    let result = sqlx::query(
        "INSERT INTO roster_moves (team_id, symbol, kind, detail, effective_date, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(mv.team_id)
    .bind(&mv.symbol)
    .bind(mv.kind.tag())
    .bind(serde_json::to_string(&mv.kind)?)
    .bind(date_str(mv.effective_date))
    .bind(ts_str(mv.created_at))
    .execute(&mut **tx)
    .await?;
    let mut stored = mv.clone();
    stored.id = result.last_insert_rowid();
    Ok(stored)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn season_from_row(row: &SqliteRow) -> Result<Season, SettleError> {
    Ok(Season {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        start_date: parse_date(&row.try_get::<String, _>("start_date")?)?,
        trade_deadline: parse_date(&row.try_get::<String, _>("trade_deadline")?)?,
        budget_cap: parse_dec(&row.try_get::<String, _>("budget_cap")?)?,
        score_multiplier: parse_dec(&row.try_get::<String, _>("score_multiplier")?)?,
        first_day_factor: parse_dec(&row.try_get::<String, _>("first_day_factor")?)?,
        max_swaps_per_day: row.try_get::<i64, _>("max_swaps_per_day")? as u32,
        max_swaps_per_week: row.try_get::<i64, _>("max_swaps_per_week")? as u32,
    })
}

fn league_from_row(row: &SqliteRow) -> Result<League, SettleError> {
    let mode_str: String = row.try_get("mode")?;
    let phase_str: String = row.try_get("phase")?;
    Ok(League {
        id: row.try_get("id")?,
        season_id: row.try_get("season_id")?,
        name: row.try_get("name")?,
        mode: LeagueMode::parse(&mode_str)
            .ok_or_else(|| SettleError::Corrupt(format!("unknown league mode {mode_str:?}")))?,
        phase: LeaguePhase::parse(&phase_str)
            .ok_or_else(|| SettleError::Corrupt(format!("unknown league phase {phase_str:?}")))?,
    })
}

fn team_from_row(row: &SqliteRow) -> Result<Team, SettleError> {
    Ok(Team {
        id: row.try_get("id")?,
        league_id: row.try_get("league_id")?,
        name: row.try_get("name")?,
        budget_remaining: parse_dec(&row.try_get::<String, _>("budget_remaining")?)?,
    })
}

fn instrument_from_row(row: &SqliteRow) -> Result<Instrument, SettleError> {
    let tier: i64 = row.try_get("tier")?;
    Ok(Instrument {
        season_id: row.try_get("season_id")?,
        symbol: row.try_get("symbol")?,
        tier: u8::try_from(tier).map_err(|_| SettleError::Corrupt(format!("bad tier {tier}")))?,
        tier_cost: parse_dec(&row.try_get::<String, _>("tier_cost")?)?,
    })
}

fn move_from_row(row: &SqliteRow) -> Result<RosterMove, SettleError> {
    let detail: String = row.try_get("detail")?;
    let kind: MoveKind = serde_json::from_str(&detail)?;
    Ok(RosterMove {
        id: row.try_get("id")?,
        team_id: row.try_get("team_id")?,
        symbol: row.try_get("symbol")?,
        kind,
        effective_date: parse_date(&row.try_get::<String, _>("effective_date")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn price_from_row(row: &SqliteRow) -> Result<PriceBar, SettleError> {
    Ok(PriceBar {
        symbol: row.try_get("symbol")?,
        date: parse_date(&row.try_get::<String, _>("date")?)?,
        close: parse_dec(&row.try_get::<String, _>("close")?)?,
        fetched_at: parse_ts(&row.try_get::<String, _>("fetched_at")?)?,
    })
}

fn day_score_from_row(row: &SqliteRow) -> Result<DayScore, SettleError> {
    let breakdown: Vec<SymbolScore> = serde_json::from_str(&row.try_get::<String, _>("breakdown")?)?;
    let missing: Vec<String> = serde_json::from_str(&row.try_get::<String, _>("missing")?)?;
    Ok(DayScore {
        team_id: row.try_get("team_id")?,
        date: parse_date(&row.try_get::<String, _>("date")?)?,
        total: parse_dec(&row.try_get::<String, _>("total")?)?,
        breakdown,
        missing,
        is_trading_day: row.try_get("is_trading_day")?,
        computed_at: parse_ts(&row.try_get::<String, _>("computed_at")?)?,
    })
}

fn claim_from_row(row: &SqliteRow) -> Result<WaiverClaim, SettleError> {
    let status_str: String = row.try_get("status")?;
    let resolved_at: Option<String> = row.try_get("resolved_at")?;
    Ok(WaiverClaim {
        id: row.try_get("id")?,
        team_id: row.try_get("team_id")?,
        add_symbol: row.try_get("add_symbol")?,
        drop_symbol: row.try_get("drop_symbol")?,
        bid: parse_dec(&row.try_get::<String, _>("bid")?)?,
        status: ClaimStatus::parse(&status_str)
            .ok_or_else(|| SettleError::Corrupt(format!("unknown claim status {status_str:?}")))?,
        effective_date: parse_date(&row.try_get::<String, _>("effective_date")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        resolved_at: resolved_at.as_deref().map(parse_ts).transpose()?,
    })
}

fn proposal_from_row(row: &SqliteRow) -> Result<TradeProposal, SettleError> {
    let status_str: String = row.try_get("status")?;
    let responded_at: Option<String> = row.try_get("responded_at")?;
    Ok(TradeProposal {
        id: row.try_get("id")?,
        league_id: row.try_get("league_id")?,
        from_team: row.try_get("from_team")?,
        to_team: row.try_get("to_team")?,
        offered: serde_json::from_str(&row.try_get::<String, _>("offered")?)?,
        requested: serde_json::from_str(&row.try_get::<String, _>("requested")?)?,
        status: TradeStatus::parse(&status_str)
            .ok_or_else(|| SettleError::Corrupt(format!("unknown trade status {status_str:?}")))?,
        effective_date: parse_date(&row.try_get::<String, _>("effective_date")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        responded_at: responded_at.as_deref().map(parse_ts).transpose()?,
    })
}

fn calendar_day_from_row(row: &SqliteRow) -> Result<CalendarDay, SettleError> {
    Ok(CalendarDay {
        date: parse_date(&row.try_get::<String, _>("date")?)?,
        is_trading: row.try_get("is_trading")?,
        prev_trading: parse_date(&row.try_get::<String, _>("prev_trading")?)?,
        next_trading: parse_date(&row.try_get::<String, _>("next_trading")?)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
