//! Waiver auction resolution.
//!
//! Pending claims with the same effective date are settled in one pass:
//! claims are grouped by the contested symbol, each group is ranked,
//! and the best candidate that still passes every check wins. The pass
//! maintains an in-memory view of ownership, holdings and budgets that
//! evolves as winners are chosen, so a team that just spent most of its
//! budget in one group is judged on the remainder in the next, and a
//! symbol dropped by an earlier win cannot be dropped again.
//!
//! Ranking within a group: highest bid first, then fewest cumulative
//! standing points (the worse record wins ties), then earliest
//! submission, then lowest claim id. Groups settle in symbol order.
//! Every status flip, move and budget change commits in a single
//! transaction at the end.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info};

use crate::calendar::TradingCalendar;
use crate::roster::{self, validator};
use crate::scoring::cache::ScoreCache;
use crate::scoring::ScoringEngine;
use crate::store::Store;
use crate::types::{
    AddSource, Holding, HoldingSet, InstrumentSet, MoveKind, RosterMove, Season, SettleError,
    WaiverClaim,
};

/// Outcome of one contested symbol.
#[derive(Debug, Clone)]
pub struct GroupResult {
    pub symbol: String,
    pub claims: u32,
    pub winning_claim: Option<i64>,
    pub winning_team: Option<i64>,
    pub winning_bid: Option<Decimal>,
}

impl fmt::Display for GroupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.winning_claim, self.winning_team, self.winning_bid) {
            (Some(claim), Some(team), Some(bid)) => write!(
                f,
                "{} -> team {} (claim #{}, bid {}) of {} claims",
                self.symbol, team, claim, bid, self.claims
            ),
            _ => write!(f, "{} -> no winner ({} claims)", self.symbol, self.claims),
        }
    }
}

/// Outcome of a full resolution pass.
#[derive(Debug, Clone)]
pub struct ResolutionReport {
    pub league_id: i64,
    pub effective_date: NaiveDate,
    pub groups: Vec<GroupResult>,
    pub won: u32,
    pub lost: u32,
}

impl fmt::Display for ResolutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "league {} waivers for {}: {} groups, {} won, {} lost",
            self.league_id,
            self.effective_date,
            self.groups.len(),
            self.won,
            self.lost
        )
    }
}

/// Settles pending waiver claims for a league and date.
#[derive(Debug, Clone)]
pub struct WaiverResolver {
    store: Store,
    calendar: TradingCalendar,
    cache: ScoreCache,
}

impl WaiverResolver {
    pub fn new(store: Store, calendar: TradingCalendar) -> Self {
        let cache = ScoreCache::new(
            store.clone(),
            ScoringEngine::new(store.clone(), calendar.clone()),
        );
        Self {
            store,
            calendar,
            cache,
        }
    }

    /// Resolve every PENDING claim in `league_id` whose effective date
    /// is `effective_date`. Idempotent: resolved claims never come back,
    /// so a second call finds nothing to do.
    pub async fn resolve_claims(
        &self,
        league_id: i64,
        effective_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<ResolutionReport, SettleError> {
        let claims = self
            .store
            .pending_claims_for_date(league_id, effective_date)
            .await?;
        if claims.is_empty() {
            return Ok(ResolutionReport {
                league_id,
                effective_date,
                groups: Vec::new(),
                won: 0,
                lost: 0,
            });
        }

        let league = self.store.league(league_id).await?;
        let season = self.store.season(league.season_id).await?;
        let instruments = InstrumentSet::new(self.store.instruments(season.id).await?);

        let claimants: BTreeSet<i64> = claims.iter().map(|c| c.team_id).collect();
        let standings = self
            .standings(&season, &claimants, effective_date)
            .await?;

        // The evolving league view. Every win is applied here first so
        // later candidates are judged against it.
        let league_moves = self.store.moves_for_league(league_id).await?;
        let mut owners = roster::ownership_at(&league_moves, effective_date);
        let mut holdings: HashMap<i64, HoldingSet> = HashMap::new();
        for &team_id in &claimants {
            let moves = self.store.moves_for_team(team_id).await?;
            holdings.insert(team_id, roster::holdings_at(&moves, &instruments, effective_date));
        }
        let mut budgets: HashMap<i64, Decimal> = HashMap::new();
        for team in self.store.teams_in_league(league_id).await? {
            budgets.insert(team.id, team.budget_remaining);
        }

        let mut groups: BTreeMap<String, Vec<WaiverClaim>> = BTreeMap::new();
        for claim in claims {
            groups.entry(claim.add_symbol.clone()).or_default().push(claim);
        }

        let mut won_ids = Vec::new();
        let mut lost_ids = Vec::new();
        let mut new_moves = Vec::new();
        let mut touched_budgets: BTreeSet<i64> = BTreeSet::new();
        let mut results = Vec::new();

        for (symbol, mut group) in groups {
            group.sort_by(|a, b| {
                b.bid
                    .cmp(&a.bid)
                    .then_with(|| standings.get(&a.team_id).cmp(&standings.get(&b.team_id)))
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            });

            let claims_in_group = group.len() as u32;
            let mut winner: Option<(i64, i64, Decimal)> = None;
            for claim in &group {
                if winner.is_some() {
                    lost_ids.push(claim.id);
                    continue;
                }
                match check_candidate(
                    claim,
                    &owners,
                    &holdings,
                    &budgets,
                    &instruments,
                    season.budget_cap,
                    effective_date,
                ) {
                    Ok(holding) => {
                        apply_win(
                            claim,
                            holding,
                            &mut owners,
                            &mut holdings,
                            &mut budgets,
                            &mut new_moves,
                            effective_date,
                            now,
                        );
                        touched_budgets.insert(claim.team_id);
                        won_ids.push(claim.id);
                        winner = Some((claim.id, claim.team_id, claim.bid));
                        debug!(
                            claim_id = claim.id,
                            team_id = claim.team_id,
                            %symbol,
                            bid = %claim.bid,
                            "claim won"
                        );
                    }
                    Err(reason) => {
                        debug!(claim_id = claim.id, team_id = claim.team_id, %symbol, %reason, "claim lost");
                        lost_ids.push(claim.id);
                    }
                }
            }
            results.push(GroupResult {
                symbol,
                claims: claims_in_group,
                winning_claim: winner.map(|(id, _, _)| id),
                winning_team: winner.map(|(_, team, _)| team),
                winning_bid: winner.map(|(_, _, bid)| bid),
            });
        }

        let budget_updates: Vec<(i64, Decimal)> = touched_budgets
            .iter()
            .filter_map(|team_id| budgets.get(team_id).map(|b| (*team_id, *b)))
            .collect();
        self.store
            .apply_waiver_resolution(now, &won_ids, &lost_ids, &new_moves, &budget_updates)
            .await?;

        let report = ResolutionReport {
            league_id,
            effective_date,
            groups: results,
            won: won_ids.len() as u32,
            lost: lost_ids.len() as u32,
        };
        info!(league_id, effective = %effective_date, %report, "waiver resolution applied");
        Ok(report)
    }

    /// Cumulative standing points per claimant team: every trading day
    /// from the season start through the day before the effective date.
    async fn standings(
        &self,
        season: &Season,
        teams: &BTreeSet<i64>,
        effective_date: NaiveDate,
    ) -> Result<HashMap<i64, Decimal>, SettleError> {
        let through = self.calendar.prev_trading_day(effective_date);
        let mut table = HashMap::new();
        for &team_id in teams {
            let points = if through < season.start_date {
                Decimal::ZERO
            } else {
                self.cache
                    .range_score(team_id, season.start_date, through)
                    .await?
                    .total
            };
            table.insert(team_id, points);
        }
        Ok(table)
    }
}

/// Re-run every acceptance check for one candidate against the evolving
/// view. Returns the holding the win would create, or the reason it
/// cannot.
fn check_candidate(
    claim: &WaiverClaim,
    owners: &HashMap<String, i64>,
    holdings: &HashMap<i64, HoldingSet>,
    budgets: &HashMap<i64, Decimal>,
    instruments: &InstrumentSet,
    budget_cap: Decimal,
    effective_date: NaiveDate,
) -> Result<Holding, String> {
    let budget = budgets.get(&claim.team_id).copied().unwrap_or_default();
    if claim.bid > budget {
        return Err(format!("bid {} exceeds remaining budget {}", claim.bid, budget));
    }
    if let Some(owner) = owners.get(&claim.add_symbol) {
        if *owner != claim.team_id {
            return Err(format!("{} already owned by team {}", claim.add_symbol, owner));
        }
    }
    let held = holdings
        .get(&claim.team_id)
        .ok_or_else(|| "claimant has no holdings".to_string())?;
    if !held.contains_key(&claim.drop_symbol) {
        return Err(format!("{} no longer held", claim.drop_symbol));
    }
    if held.contains_key(&claim.add_symbol) {
        return Err(format!("{} already held", claim.add_symbol));
    }
    let inst = instruments
        .get(&claim.add_symbol)
        .ok_or_else(|| format!("unknown symbol {}", claim.add_symbol))?;

    let holding = Holding {
        symbol: claim.add_symbol.clone(),
        acquired: effective_date,
        tier: inst.tier,
        tier_cost: inst.tier_cost,
    };
    let mut projected = held.clone();
    projected.remove(&claim.drop_symbol);
    projected.insert(claim.add_symbol.clone(), holding.clone());
    let report = validator::validate(&projected, budget_cap);
    if !report.valid {
        return Err(format!("projected roster invalid: {}", report.reasons.join("; ")));
    }
    Ok(holding)
}

/// Fold a win into the evolving view and stage its move pair.
#[allow(clippy::too_many_arguments)]
fn apply_win(
    claim: &WaiverClaim,
    holding: Holding,
    owners: &mut HashMap<String, i64>,
    holdings: &mut HashMap<i64, HoldingSet>,
    budgets: &mut HashMap<i64, Decimal>,
    new_moves: &mut Vec<RosterMove>,
    effective_date: NaiveDate,
    now: DateTime<Utc>,
) {
    let held = holdings.entry(claim.team_id).or_default();
    held.remove(&claim.drop_symbol);
    held.insert(claim.add_symbol.clone(), holding);
    if owners.get(&claim.drop_symbol) == Some(&claim.team_id) {
        owners.remove(&claim.drop_symbol);
    }
    owners.insert(claim.add_symbol.clone(), claim.team_id);
    *budgets.entry(claim.team_id).or_default() -= claim.bid;

    new_moves.push(RosterMove {
        id: 0,
        team_id: claim.team_id,
        symbol: claim.drop_symbol.clone(),
        kind: MoveKind::Drop,
        effective_date,
        created_at: now,
    });
    new_moves.push(RosterMove {
        id: 0,
        team_id: claim.team_id,
        symbol: claim.add_symbol.clone(),
        kind: MoveKind::Add {
            via: AddSource::Waiver { claim_id: claim.id },
        },
        effective_date,
        created_at: now,
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClaimStatus, DayScore, Instrument, LeagueMode, LeaguePhase};
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    const TIERS: [u8; 8] = [1, 2, 3, 4, 5, 4, 5, 3];
    const COSTS: [&str; 8] = ["20", "16", "12", "8", "4", "8", "4", "12"];

    /// Two full squads (A1..A8 and B1..B8) plus two free agents, all in
    /// a unique-ownership league. A3/A8 and B3/B8 are the Tier-3 slots
    /// the tests swap against the Tier-3 free agents FAA/FAB.
    async fn fixture() -> (Store, WaiverResolver, i64, i64) {
        let store = Store::open_in_memory().await.unwrap();
        let season = store
            .create_season(&Season {
                id: 0,
                name: "2026".to_string(),
                start_date: d("2026-03-02"),
                trade_deadline: d("2026-05-29"),
                budget_cap: dec!(100),
                score_multiplier: dec!(1),
                first_day_factor: dec!(0.5),
                max_swaps_per_day: 5,
                max_swaps_per_week: 10,
            })
            .await
            .unwrap();
        let league = store
            .create_league(season.id, "L", LeagueMode::UniqueOwnership)
            .await
            .unwrap();
        store
            .set_league_phase(league.id, LeaguePhase::Active)
            .await
            .unwrap();
        let t1 = store.create_team(league.id, "T1", dec!(100)).await.unwrap();
        let t2 = store.create_team(league.id, "T2", dec!(100)).await.unwrap();

        let mut instruments = Vec::new();
        for prefix in ["A", "B"] {
            for (i, (tier, cost)) in TIERS.iter().zip(COSTS.iter()).enumerate() {
                instruments.push(Instrument {
                    season_id: season.id,
                    symbol: format!("{}{}", prefix, i + 1),
                    tier: *tier,
                    tier_cost: cost.parse().unwrap(),
                });
            }
        }
        for fa in ["FAA", "FAB"] {
            instruments.push(Instrument {
                season_id: season.id,
                symbol: fa.to_string(),
                tier: 3,
                tier_cost: dec!(12),
            });
        }
        store.populate_instruments(season.id, &instruments).await.unwrap();

        for (team_id, prefix) in [(t1.id, "A"), (t2.id, "B")] {
            for i in 1..=8 {
                store
                    .append_move(&RosterMove {
                        id: 0,
                        team_id,
                        symbol: format!("{prefix}{i}"),
                        kind: MoveKind::Draft,
                        effective_date: d("2026-03-02"),
                        created_at: ts("2026-03-01T12:00:00Z"),
                    })
                    .await
                    .unwrap();
            }
        }

        let resolver = WaiverResolver::new(store.clone(), TradingCalendar::us_equities());
        (store, resolver, t1.id, t2.id)
    }

    async fn seed_claim(
        store: &Store,
        team_id: i64,
        add: &str,
        drop: &str,
        bid: Decimal,
        created: &str,
    ) -> WaiverClaim {
        store
            .create_claim(&WaiverClaim {
                id: 0,
                team_id,
                add_symbol: add.to_string(),
                drop_symbol: drop.to_string(),
                bid,
                status: ClaimStatus::Pending,
                effective_date: d("2026-03-04"),
                created_at: ts(created),
                resolved_at: None,
            })
            .await
            .unwrap()
    }

    async fn seed_standing(store: &Store, team_id: i64, date: &str, total: Decimal) {
        store
            .upsert_day_score(&DayScore {
                team_id,
                date: d(date),
                total,
                breakdown: Vec::new(),
                missing: Vec::new(),
                is_trading_day: true,
                computed_at: ts("2026-03-03T21:00:00Z"),
            })
            .await
            .unwrap();
    }

    const NOON: &str = "2026-03-04T12:00:00Z";

    #[tokio::test]
    async fn test_highest_bid_wins_the_group() {
        let (store, resolver, t1, t2) = fixture().await;
        let c1 = seed_claim(&store, t1, "FAA", "A3", dec!(20), "2026-03-03T22:00:00Z").await;
        let c2 = seed_claim(&store, t2, "FAA", "B3", dec!(10), "2026-03-03T22:05:00Z").await;

        let report = resolver.resolve_claims(1, d("2026-03-04"), ts(NOON)).await.unwrap();
        assert_eq!(report.won, 1);
        assert_eq!(report.lost, 1);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].winning_claim, Some(c1.id));
        assert_eq!(report.groups[0].winning_bid, Some(dec!(20)));

        assert_eq!(store.claim(c1.id).await.unwrap().status, ClaimStatus::Won);
        assert_eq!(store.claim(c2.id).await.unwrap().status, ClaimStatus::Lost);
        assert_eq!(store.team(t1).await.unwrap().budget_remaining, dec!(80));
        assert_eq!(store.team(t2).await.unwrap().budget_remaining, dec!(100));

        let instruments = InstrumentSet::new(store.instruments(1).await.unwrap());
        let moves = store.moves_for_team(t1).await.unwrap();
        let held = roster::holdings_at(&moves, &instruments, d("2026-03-04"));
        assert!(held.contains_key("FAA"));
        assert!(!held.contains_key("A3"));
        assert_eq!(held.len(), 8);
        let add = moves
            .iter()
            .find(|m| m.symbol == "FAA")
            .expect("add move recorded");
        assert_eq!(
            add.kind,
            MoveKind::Add {
                via: AddSource::Waiver { claim_id: c1.id }
            }
        );

        // A second pass finds nothing pending.
        let rerun = resolver.resolve_claims(1, d("2026-03-04"), ts(NOON)).await.unwrap();
        assert!(rerun.groups.is_empty());
    }

    #[tokio::test]
    async fn test_bid_tie_prefers_fewer_standing_points() {
        let (store, resolver, t1, t2) = fixture().await;
        // T1 is leading the league; T2 has the worse record.
        seed_standing(&store, t1, "2026-03-02", dec!(5)).await;
        seed_standing(&store, t2, "2026-03-02", dec!(1)).await;
        let c1 = seed_claim(&store, t1, "FAA", "A3", dec!(10), "2026-03-03T22:00:00Z").await;
        let c2 = seed_claim(&store, t2, "FAA", "B3", dec!(10), "2026-03-03T22:05:00Z").await;

        resolver.resolve_claims(1, d("2026-03-04"), ts(NOON)).await.unwrap();
        assert_eq!(store.claim(c1.id).await.unwrap().status, ClaimStatus::Lost);
        assert_eq!(store.claim(c2.id).await.unwrap().status, ClaimStatus::Won);
    }

    #[tokio::test]
    async fn test_full_tie_prefers_earlier_submission() {
        let (store, resolver, t1, t2) = fixture().await;
        // No scores seeded: both standings are zero.
        let c1 = seed_claim(&store, t1, "FAA", "A3", dec!(10), "2026-03-03T22:04:00Z").await;
        let c2 = seed_claim(&store, t2, "FAA", "B3", dec!(10), "2026-03-03T21:55:00Z").await;

        resolver.resolve_claims(1, d("2026-03-04"), ts(NOON)).await.unwrap();
        assert_eq!(store.claim(c1.id).await.unwrap().status, ClaimStatus::Lost);
        assert_eq!(store.claim(c2.id).await.unwrap().status, ClaimStatus::Won);
    }

    #[tokio::test]
    async fn test_budget_spent_in_earlier_group_limits_later_one() {
        let (store, resolver, t1, t2) = fixture().await;
        let c1 = seed_claim(&store, t1, "FAA", "A3", dec!(95), "2026-03-03T22:00:00Z").await;
        let c2 = seed_claim(&store, t1, "FAB", "A8", dec!(10), "2026-03-03T22:01:00Z").await;
        let c3 = seed_claim(&store, t2, "FAB", "B8", dec!(2), "2026-03-03T22:02:00Z").await;

        let report = resolver.resolve_claims(1, d("2026-03-04"), ts(NOON)).await.unwrap();
        assert_eq!(report.won, 2);
        assert_eq!(report.lost, 1);

        // FAA settles first (symbol order) and drains T1 to 5; T1's
        // outbidding FAB claim then fails its budget re-check.
        assert_eq!(store.claim(c1.id).await.unwrap().status, ClaimStatus::Won);
        assert_eq!(store.claim(c2.id).await.unwrap().status, ClaimStatus::Lost);
        assert_eq!(store.claim(c3.id).await.unwrap().status, ClaimStatus::Won);
        assert_eq!(store.team(t1).await.unwrap().budget_remaining, dec!(5));
        assert_eq!(store.team(t2).await.unwrap().budget_remaining, dec!(98));

        let instruments = InstrumentSet::new(store.instruments(1).await.unwrap());
        let t1_held = roster::holdings_at(
            &store.moves_for_team(t1).await.unwrap(),
            &instruments,
            d("2026-03-04"),
        );
        assert!(t1_held.contains_key("FAA"));
        assert!(!t1_held.contains_key("FAB"));
        assert!(t1_held.contains_key("A8"));
        let t2_held = roster::holdings_at(
            &store.moves_for_team(t2).await.unwrap(),
            &instruments,
            d("2026-03-04"),
        );
        assert!(t2_held.contains_key("FAB"));
        assert!(!t2_held.contains_key("B8"));
    }

    #[tokio::test]
    async fn test_drop_consumed_by_earlier_win_fails_later_claim() {
        let (store, resolver, t1, _) = fixture().await;
        let c1 = seed_claim(&store, t1, "FAA", "A3", dec!(20), "2026-03-03T22:00:00Z").await;
        let c2 = seed_claim(&store, t1, "FAB", "A3", dec!(20), "2026-03-03T22:01:00Z").await;

        let report = resolver.resolve_claims(1, d("2026-03-04"), ts(NOON)).await.unwrap();
        assert_eq!(store.claim(c1.id).await.unwrap().status, ClaimStatus::Won);
        assert_eq!(store.claim(c2.id).await.unwrap().status, ClaimStatus::Lost);
        assert_eq!(report.groups[1].winning_claim, None);

        let instruments = InstrumentSet::new(store.instruments(1).await.unwrap());
        let held = roster::holdings_at(
            &store.moves_for_team(t1).await.unwrap(),
            &instruments,
            d("2026-03-04"),
        );
        assert!(held.contains_key("FAA"));
        assert!(!held.contains_key("FAB"));
        assert_eq!(store.team(t1).await.unwrap().budget_remaining, dec!(80));
    }

    #[tokio::test]
    async fn test_symbol_taken_since_submission_fails_candidate() {
        let (store, resolver, t1, t2) = fixture().await;
        // T2 picked up FAA overnight, after T1's claim went in.
        store
            .append_moves(&[
                RosterMove {
                    id: 0,
                    team_id: t2,
                    symbol: "B3".to_string(),
                    kind: MoveKind::Drop,
                    effective_date: d("2026-03-03"),
                    created_at: ts("2026-03-02T22:00:00Z"),
                },
                RosterMove {
                    id: 0,
                    team_id: t2,
                    symbol: "FAA".to_string(),
                    kind: MoveKind::Add {
                        via: AddSource::Swap,
                    },
                    effective_date: d("2026-03-03"),
                    created_at: ts("2026-03-02T22:00:00Z"),
                },
            ])
            .await
            .unwrap();
        let c1 = seed_claim(&store, t1, "FAA", "A3", dec!(10), "2026-03-02T21:00:00Z").await;

        let report = resolver.resolve_claims(1, d("2026-03-04"), ts(NOON)).await.unwrap();
        assert_eq!(report.won, 0);
        assert_eq!(report.lost, 1);
        assert_eq!(store.claim(c1.id).await.unwrap().status, ClaimStatus::Lost);
        assert_eq!(store.team(t1).await.unwrap().budget_remaining, dec!(100));
    }

    #[tokio::test]
    async fn test_no_pending_claims_is_a_noop() {
        let (_, resolver, _, _) = fixture().await;
        let report = resolver.resolve_claims(1, d("2026-03-04"), ts(NOON)).await.unwrap();
        assert!(report.groups.is_empty());
        assert_eq!(report.won, 0);
        assert_eq!(report.lost, 0);
    }
}
