//! Team-to-team trades.
//!
//! A trade is proposed by one team, answered by the other, and settles
//! as paired TRADE moves — an outgoing and an incoming leg per symbol,
//! all effective on the same trading day. Because holdings drift while
//! a proposal sits open, acceptance re-runs every ownership and roster
//! check from scratch and re-derives the effective date from the
//! acceptance time; the date stored at proposal time is a plan, not a
//! promise. Proposals that can no longer be legally accepted before the
//! season's trade deadline are swept to EXPIRED.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;
use tracing::info;

use crate::calendar::TradingCalendar;
use crate::roster::{self, validator};
use crate::store::Store;
use crate::types::{
    Holding, HoldingSet, InstrumentSet, League, LeagueMode, LeaguePhase, MoveKind, RosterMove,
    Season, SettleError, Team, TradeDirection, TradeProposal, TradeStatus,
};

struct TradeContext {
    from_team: Team,
    to_team: Team,
    league: League,
    season: Season,
    instruments: InstrumentSet,
}

/// Proposes, answers, and expires trades.
#[derive(Debug, Clone)]
pub struct TradeEngine {
    store: Store,
    calendar: TradingCalendar,
}

impl TradeEngine {
    pub fn new(store: Store, calendar: TradingCalendar) -> Self {
        Self { store, calendar }
    }

    /// Propose exchanging `offered` (proposer's symbols) for
    /// `requested` (counterparty's symbols). Persists a PENDING
    /// proposal; no roster change happens until acceptance.
    pub async fn propose(
        &self,
        from_team: i64,
        to_team: i64,
        offered: &[String],
        requested: &[String],
        now: DateTime<Utc>,
    ) -> Result<TradeProposal, SettleError> {
        if from_team == to_team {
            return Err(SettleError::validation("cannot trade with yourself"));
        }
        if self.calendar.is_market_open(now) {
            return Err(SettleError::validation(
                "market is open; trades are accepted only after the close",
            ));
        }
        check_symbol_lists(offered, requested)?;

        let ctx = self.context(from_team, to_team).await?;
        if ctx.league.mode != LeagueMode::UniqueOwnership {
            return Err(SettleError::validation(
                "trades require a unique-ownership league",
            ));
        }
        if ctx.league.phase != LeaguePhase::Active {
            return Err(SettleError::validation(format!(
                "league is {}; roster moves require ACTIVE",
                ctx.league.phase.as_str()
            )));
        }

        let effective_date = self.calendar.effective_date_for(now);
        if effective_date > ctx.season.trade_deadline {
            return Err(SettleError::validation(format!(
                "trade deadline {} has passed",
                ctx.season.trade_deadline
            )));
        }
        self.check_exchange(&ctx, offered, requested, effective_date)
            .await?;

        let proposal = self
            .store
            .create_proposal(&TradeProposal {
                id: 0,
                league_id: ctx.league.id,
                from_team,
                to_team,
                offered: offered.to_vec(),
                requested: requested.to_vec(),
                status: TradeStatus::Pending,
                effective_date,
                created_at: now,
                responded_at: None,
            })
            .await?;
        info!(
            proposal_id = proposal.id,
            from_team,
            to_team,
            offered = ?proposal.offered,
            requested = ?proposal.requested,
            effective = %effective_date,
            "trade proposed"
        );
        Ok(proposal)
    }

    /// Accept a pending proposal as the receiving team.
    ///
    /// Every check from proposal time runs again here, against an
    /// effective date derived from `now` — holdings, budgets of truth,
    /// and the deadline may all have moved since the offer went in.
    pub async fn accept(
        &self,
        proposal_id: i64,
        acting_team: i64,
        now: DateTime<Utc>,
    ) -> Result<TradeProposal, SettleError> {
        let mut proposal = self.store.proposal(proposal_id).await?;
        require_transition(&proposal, TradeStatus::Accepted)?;
        if acting_team != proposal.to_team {
            return Err(SettleError::validation(
                "only the receiving team can accept a trade",
            ));
        }

        let ctx = self.context(proposal.from_team, proposal.to_team).await?;
        let effective_date = self.calendar.effective_date_for(now);
        if effective_date > ctx.season.trade_deadline {
            return Err(SettleError::validation(format!(
                "trade deadline {} has passed",
                ctx.season.trade_deadline
            )));
        }
        self.check_exchange(&ctx, &proposal.offered, &proposal.requested, effective_date)
            .await?;

        let legs = trade_legs(&proposal, effective_date, now);
        self.store.commit_trade(proposal.id, now, &legs).await?;
        proposal.status = TradeStatus::Accepted;
        proposal.responded_at = Some(now);
        info!(
            proposal_id = proposal.id,
            effective = %effective_date,
            legs = legs.len(),
            "trade accepted"
        );
        Ok(proposal)
    }

    /// Decline a pending proposal as the receiving team.
    pub async fn reject(
        &self,
        proposal_id: i64,
        acting_team: i64,
        now: DateTime<Utc>,
    ) -> Result<TradeProposal, SettleError> {
        self.answer(proposal_id, acting_team, TradeStatus::Rejected, now)
            .await
    }

    /// Withdraw a pending proposal as the proposing team.
    pub async fn cancel(
        &self,
        proposal_id: i64,
        acting_team: i64,
        now: DateTime<Utc>,
    ) -> Result<TradeProposal, SettleError> {
        self.answer(proposal_id, acting_team, TradeStatus::Cancelled, now)
            .await
    }

    /// Sweep PENDING proposals that can no longer be accepted in time:
    /// once the next possible acceptance would settle after the trade
    /// deadline, the proposal is dead. Idempotent, cheap when nothing
    /// qualifies.
    pub async fn expire_pending(
        &self,
        league_id: i64,
        as_of: DateTime<Utc>,
    ) -> Result<u64, SettleError> {
        let league = self.store.league(league_id).await?;
        let season = self.store.season(league.season_id).await?;
        if self.calendar.effective_date_for(as_of) <= season.trade_deadline {
            return Ok(0);
        }
        let pending = self.store.pending_proposals(league_id).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = pending.iter().map(|p| p.id).collect();
        let expired = self.store.expire_proposals(&ids, as_of).await?;
        info!(league_id, expired, "expired pending trades past the deadline");
        Ok(expired)
    }

    async fn answer(
        &self,
        proposal_id: i64,
        acting_team: i64,
        to_status: TradeStatus,
        now: DateTime<Utc>,
    ) -> Result<TradeProposal, SettleError> {
        let mut proposal = self.store.proposal(proposal_id).await?;
        require_transition(&proposal, to_status)?;
        let (allowed, role) = match to_status {
            TradeStatus::Rejected => (proposal.to_team, "receiving"),
            TradeStatus::Cancelled => (proposal.from_team, "proposing"),
            _ => (acting_team, ""),
        };
        if acting_team != allowed {
            return Err(SettleError::validation(format!(
                "only the {role} team can {} a trade",
                match to_status {
                    TradeStatus::Rejected => "reject",
                    _ => "cancel",
                }
            )));
        }
        self.store
            .set_proposal_status(proposal_id, to_status, Some(now))
            .await?;
        proposal.status = to_status;
        proposal.responded_at = Some(now);
        info!(proposal_id, status = to_status.as_str(), "trade answered");
        Ok(proposal)
    }

    async fn context(&self, from_team: i64, to_team: i64) -> Result<TradeContext, SettleError> {
        let from_team = self.store.team(from_team).await?;
        let to_team = self.store.team(to_team).await?;
        if from_team.league_id != to_team.league_id {
            return Err(SettleError::validation("teams are in different leagues"));
        }
        let league = self.store.league(from_team.league_id).await?;
        let season = self.store.season(league.season_id).await?;
        let instruments = InstrumentSet::new(self.store.instruments(season.id).await?);
        Ok(TradeContext {
            from_team,
            to_team,
            league,
            season,
            instruments,
        })
    }

    /// Verify both sides own what they are giving away and that both
    /// post-trade rosters stand on their own.
    async fn check_exchange(
        &self,
        ctx: &TradeContext,
        offered: &[String],
        requested: &[String],
        effective_date: NaiveDate,
    ) -> Result<(), SettleError> {
        let from_moves = self.store.moves_for_team(ctx.from_team.id).await?;
        let from_held = roster::holdings_at(&from_moves, &ctx.instruments, effective_date);
        let to_moves = self.store.moves_for_team(ctx.to_team.id).await?;
        let to_held = roster::holdings_at(&to_moves, &ctx.instruments, effective_date);

        for symbol in offered {
            if !from_held.contains_key(symbol) {
                return Err(SettleError::validation(format!(
                    "{symbol} is not held by the proposing team"
                )));
            }
        }
        for symbol in requested {
            if !to_held.contains_key(symbol) {
                return Err(SettleError::validation(format!(
                    "{symbol} is not held by the receiving team"
                )));
            }
        }

        let from_projected = exchange(
            &from_held,
            offered,
            requested,
            &ctx.instruments,
            effective_date,
        )?;
        let report = validator::validate(&from_projected, ctx.season.budget_cap);
        if !report.valid {
            return Err(SettleError::validation(format!(
                "proposing team's post-trade roster invalid: {}",
                report.reasons.join("; ")
            )));
        }
        let to_projected = exchange(
            &to_held,
            requested,
            offered,
            &ctx.instruments,
            effective_date,
        )?;
        let report = validator::validate(&to_projected, ctx.season.budget_cap);
        if !report.valid {
            return Err(SettleError::validation(format!(
                "receiving team's post-trade roster invalid: {}",
                report.reasons.join("; ")
            )));
        }
        Ok(())
    }
}

fn require_transition(proposal: &TradeProposal, to: TradeStatus) -> Result<(), SettleError> {
    if !proposal.status.can_become(to) {
        return Err(SettleError::validation(format!(
            "proposal #{} is {}; only PENDING proposals can be answered",
            proposal.id, proposal.status
        )));
    }
    Ok(())
}

fn check_symbol_lists(offered: &[String], requested: &[String]) -> Result<(), SettleError> {
    if offered.is_empty() && requested.is_empty() {
        return Err(SettleError::validation(
            "trade must exchange at least one symbol",
        ));
    }
    let offered_set: BTreeSet<&String> = offered.iter().collect();
    let requested_set: BTreeSet<&String> = requested.iter().collect();
    if offered_set.len() != offered.len() || requested_set.len() != requested.len() {
        return Err(SettleError::validation("trade lists a symbol twice"));
    }
    if offered_set.intersection(&requested_set).next().is_some() {
        return Err(SettleError::validation(
            "offered and requested symbols overlap",
        ));
    }
    Ok(())
}

/// Apply one side of the exchange to a holding set.
fn exchange(
    held: &HoldingSet,
    outgoing: &[String],
    incoming: &[String],
    instruments: &InstrumentSet,
    effective_date: NaiveDate,
) -> Result<HoldingSet, SettleError> {
    let mut projected = held.clone();
    for symbol in outgoing {
        projected.remove(symbol);
    }
    for symbol in incoming {
        let inst = instruments
            .get(symbol)
            .ok_or_else(|| SettleError::validation(format!("unknown symbol {symbol}")))?;
        projected.insert(
            symbol.clone(),
            Holding {
                symbol: symbol.clone(),
                acquired: effective_date,
                tier: inst.tier,
                tier_cost: inst.tier_cost,
            },
        );
    }
    Ok(projected)
}

/// The four-per-symbol move fan-out: one outgoing and one incoming leg
/// per traded symbol, every leg stamped with the proposal.
fn trade_legs(
    proposal: &TradeProposal,
    effective_date: NaiveDate,
    now: DateTime<Utc>,
) -> Vec<RosterMove> {
    let mut legs = Vec::new();
    let mut push_pair = |symbol: &String, from: i64, to: i64| {
        legs.push(RosterMove {
            id: 0,
            team_id: from,
            symbol: symbol.clone(),
            kind: MoveKind::Trade {
                direction: TradeDirection::Outgoing,
                counterparty: to,
                proposal_id: proposal.id,
            },
            effective_date,
            created_at: now,
        });
        legs.push(RosterMove {
            id: 0,
            team_id: to,
            symbol: symbol.clone(),
            kind: MoveKind::Trade {
                direction: TradeDirection::Incoming,
                counterparty: from,
                proposal_id: proposal.id,
            },
            effective_date,
            created_at: now,
        });
    };
    for symbol in &proposal.offered {
        push_pair(symbol, proposal.from_team, proposal.to_team);
    }
    for symbol in &proposal.requested {
        push_pair(symbol, proposal.to_team, proposal.from_team);
    }
    legs
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
