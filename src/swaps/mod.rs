//! Overnight swaps.
//!
//! A swap exchanges one held symbol for one unheld symbol, effective
//! the next trading day. Submissions are validated against the roster
//! as it will stand on that effective date, never against today's
//! snapshot. In duplicates-allowed leagues a valid swap commits its
//! drop+add move pair immediately; in unique-ownership leagues it only
//! queues a PENDING waiver claim for [`waivers`] to resolve.

pub mod waivers;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use tracing::info;

use crate::calendar::TradingCalendar;
use crate::roster::{self, validator};
use crate::store::Store;
use crate::types::{
    AddSource, ClaimStatus, Holding, InstrumentSet, League, LeagueMode, LeaguePhase, MoveKind,
    RosterMove, Season, SettleError, Team, WaiverClaim,
};

/// What a successful submission produced.
#[derive(Debug, Clone)]
pub enum SwapOutcome {
    /// Duplicates-allowed league: the move pair is already in the log.
    Committed {
        drop_move: RosterMove,
        add_move: RosterMove,
    },
    /// Unique-ownership league: queued for the next waiver auction.
    ClaimQueued(WaiverClaim),
}

impl fmt::Display for SwapOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapOutcome::Committed { drop_move, add_move } => write!(
                f,
                "committed -{} +{} effective {}",
                drop_move.symbol, add_move.symbol, add_move.effective_date
            ),
            SwapOutcome::ClaimQueued(claim) => write!(f, "queued {claim}"),
        }
    }
}

struct SwapContext {
    team: Team,
    league: League,
    season: Season,
    instruments: InstrumentSet,
}

/// Validates and applies swap submissions.
#[derive(Debug, Clone)]
pub struct SwapEngine {
    store: Store,
    calendar: TradingCalendar,
}

impl SwapEngine {
    pub fn new(store: Store, calendar: TradingCalendar) -> Self {
        Self { store, calendar }
    }

    /// Submit a swap for `team_id`: drop one symbol, add another. `bid`
    /// is required in unique-ownership leagues and ignored otherwise.
    ///
    /// Every rejection is a [`SettleError::Validation`] naming the rule
    /// that failed; nothing is persisted on rejection.
    pub async fn submit_swap(
        &self,
        team_id: i64,
        drop_symbol: &str,
        add_symbol: &str,
        bid: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<SwapOutcome, SettleError> {
        if drop_symbol == add_symbol {
            return Err(SettleError::validation("cannot swap a symbol for itself"));
        }
        if self.calendar.is_market_open(now) {
            return Err(SettleError::validation(
                "market is open; swaps are accepted only after the close",
            ));
        }

        let ctx = self.context(team_id).await?;
        if ctx.league.phase != LeaguePhase::Active {
            return Err(SettleError::validation(format!(
                "league is {}; roster moves require ACTIVE",
                ctx.league.phase.as_str()
            )));
        }
        self.check_swap_limits(&ctx.season, team_id, now).await?;

        let effective_date = self.calendar.effective_date_for(now);
        let moves = self.store.moves_for_team(team_id).await?;
        let holdings = roster::holdings_at(&moves, &ctx.instruments, effective_date);
        if !holdings.contains_key(drop_symbol) {
            return Err(SettleError::validation(format!(
                "{drop_symbol} is not on the roster as of {effective_date}"
            )));
        }
        if holdings.contains_key(add_symbol) {
            return Err(SettleError::validation(format!(
                "{add_symbol} is already on the roster as of {effective_date}"
            )));
        }
        let added = ctx.instruments.get(add_symbol).ok_or_else(|| {
            SettleError::validation(format!("unknown symbol {add_symbol}"))
        })?;

        let mut projected = holdings.clone();
        projected.remove(drop_symbol);
        projected.insert(
            add_symbol.to_string(),
            Holding {
                symbol: add_symbol.to_string(),
                acquired: effective_date,
                tier: added.tier,
                tier_cost: added.tier_cost,
            },
        );
        let report = validator::validate(&projected, ctx.season.budget_cap);
        if !report.valid {
            return Err(SettleError::validation(format!(
                "projected roster invalid: {}",
                report.reasons.join("; ")
            )));
        }

        match ctx.league.mode {
            LeagueMode::DuplicatesAllowed => {
                self.commit_pair(&ctx, team_id, drop_symbol, add_symbol, effective_date, now)
                    .await
            }
            LeagueMode::UniqueOwnership => {
                self.queue_claim(&ctx, team_id, drop_symbol, add_symbol, bid, effective_date, now)
                    .await
            }
        }
    }

    /// Withdraw a team's own PENDING claim before resolution.
    pub async fn cancel_claim(
        &self,
        claim_id: i64,
        team_id: i64,
        now: DateTime<Utc>,
    ) -> Result<WaiverClaim, SettleError> {
        let mut claim = self.store.claim(claim_id).await?;
        if claim.team_id != team_id {
            return Err(SettleError::validation(format!(
                "claim #{claim_id} belongs to another team"
            )));
        }
        if !claim.status.can_become(ClaimStatus::Cancelled) {
            return Err(SettleError::validation(format!(
                "claim #{claim_id} is {}; only PENDING claims can be cancelled",
                claim.status
            )));
        }
        self.store
            .set_claim_status(claim_id, ClaimStatus::Cancelled, Some(now))
            .await?;
        claim.status = ClaimStatus::Cancelled;
        claim.resolved_at = Some(now);
        info!(claim_id, team_id, "waiver claim cancelled");
        Ok(claim)
    }

    async fn context(&self, team_id: i64) -> Result<SwapContext, SettleError> {
        let team = self.store.team(team_id).await?;
        let league = self.store.league(team.league_id).await?;
        let season = self.store.season(league.season_id).await?;
        let instruments = InstrumentSet::new(self.store.instruments(season.id).await?);
        Ok(SwapContext {
            team,
            league,
            season,
            instruments,
        })
    }

    /// Swap slots already used in the submission's UTC day and ISO
    /// week: committed swap adds plus live (non-cancelled) claims.
    async fn check_swap_limits(
        &self,
        season: &Season,
        team_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), SettleError> {
        let (day_from, day_to) = utc_day_window(now);
        let used_today = self.swaps_used(team_id, day_from, day_to).await?;
        if used_today >= season.max_swaps_per_day {
            return Err(SettleError::validation(format!(
                "daily swap limit of {} reached",
                season.max_swaps_per_day
            )));
        }
        let (week_from, week_to) = iso_week_window(now);
        let used_this_week = self.swaps_used(team_id, week_from, week_to).await?;
        if used_this_week >= season.max_swaps_per_week {
            return Err(SettleError::validation(format!(
                "weekly swap limit of {} reached",
                season.max_swaps_per_week
            )));
        }
        Ok(())
    }

    async fn swaps_used(
        &self,
        team_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u32, SettleError> {
        let moves = self.store.moves_created_between(team_id, from, to).await?;
        let claims = self.store.claims_created_between(team_id, from, to).await?;
        let committed = moves
            .iter()
            .filter(|m| m.kind.counts_toward_swap_limit())
            .count();
        let queued = claims
            .iter()
            .filter(|c| c.status != ClaimStatus::Cancelled)
            .count();
        Ok((committed + queued) as u32)
    }

    async fn commit_pair(
        &self,
        ctx: &SwapContext,
        team_id: i64,
        drop_symbol: &str,
        add_symbol: &str,
        effective_date: chrono::NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<SwapOutcome, SettleError> {
        let pair = [
            RosterMove {
                id: 0,
                team_id,
                symbol: drop_symbol.to_string(),
                kind: MoveKind::Drop,
                effective_date,
                created_at: now,
            },
            RosterMove {
                id: 0,
                team_id,
                symbol: add_symbol.to_string(),
                kind: MoveKind::Add {
                    via: AddSource::Swap,
                },
                effective_date,
                created_at: now,
            },
        ];
        let mut stored = self.store.append_moves(&pair).await?;
        let add_move = stored.pop().ok_or_else(|| {
            SettleError::Corrupt("swap commit returned no moves".to_string())
        })?;
        let drop_move = stored.pop().ok_or_else(|| {
            SettleError::Corrupt("swap commit returned a single move".to_string())
        })?;
        info!(
            team_id,
            league = ctx.league.id,
            drop = drop_symbol,
            add = add_symbol,
            effective = %effective_date,
            "swap committed"
        );
        Ok(SwapOutcome::Committed { drop_move, add_move })
    }

    async fn queue_claim(
        &self,
        ctx: &SwapContext,
        team_id: i64,
        drop_symbol: &str,
        add_symbol: &str,
        bid: Option<Decimal>,
        effective_date: chrono::NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<SwapOutcome, SettleError> {
        let bid = bid.ok_or_else(|| {
            SettleError::validation("a bid is required in unique-ownership leagues")
        })?;
        if bid < Decimal::ZERO {
            return Err(SettleError::validation("bid cannot be negative"));
        }
        if bid > ctx.team.budget_remaining {
            return Err(SettleError::validation(format!(
                "bid {} exceeds remaining budget {}",
                bid, ctx.team.budget_remaining
            )));
        }
        let league_moves = self.store.moves_for_league(ctx.league.id).await?;
        let owners = roster::ownership_at(&league_moves, effective_date);
        if let Some(owner) = owners.get(add_symbol) {
            if *owner != team_id {
                return Err(SettleError::validation(format!(
                    "{add_symbol} is owned by another team"
                )));
            }
        }
        let claim = self
            .store
            .create_claim(&WaiverClaim {
                id: 0,
                team_id,
                add_symbol: add_symbol.to_string(),
                drop_symbol: drop_symbol.to_string(),
                bid,
                status: ClaimStatus::Pending,
                effective_date,
                created_at: now,
                resolved_at: None,
            })
            .await?;
        info!(
            claim_id = claim.id,
            team_id,
            league = ctx.league.id,
            add = add_symbol,
            bid = %bid,
            effective = %effective_date,
            "waiver claim queued"
        );
        Ok(SwapOutcome::ClaimQueued(claim))
    }
}

// ---------------------------------------------------------------------------
// Limit windows
// ---------------------------------------------------------------------------

fn utc_day_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

fn iso_week_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let day = now.date_naive();
    let monday = day - Duration::days(day.weekday().num_days_from_monday() as i64);
    let start = monday.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(7))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
