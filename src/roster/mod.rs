//! Holdings reconstruction from the append-only move log.
//!
//! Nothing here mutates state. The holding set a team owns on any date
//! is always derived by replaying its moves in the explicit replay
//! order, so historical questions ("what did team 3 hold on March 9?")
//! have exact answers forever. The pure folds live at module level;
//! [`HoldingsReconstructor`] is the thin async shell that gathers their
//! inputs from the store.

pub mod validator;

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::store::Store;
use crate::types::{Holding, HoldingSet, InstrumentSet, RosterMove, SettleError};

// ---------------------------------------------------------------------------
// Pure folds
// ---------------------------------------------------------------------------

/// Replay a team's moves into the holding set valid on `as_of`.
///
/// Only moves with `effective_date <= as_of` participate, in replay
/// order. Draft/Add/Trade-incoming insert the symbol with that move's
/// effective date as acquisition date; Drop/Trade-outgoing remove it
/// when present. The fold result is then joined against the season's
/// frozen instrument set; symbols the set does not know are skipped
/// (should not occur once instruments are frozen).
pub fn holdings_at(
    moves: &[RosterMove],
    instruments: &InstrumentSet,
    as_of: NaiveDate,
) -> HoldingSet {
    let mut ordered: Vec<&RosterMove> = moves
        .iter()
        .filter(|m| m.effective_date <= as_of)
        .collect();
    ordered.sort_by_key(|m| m.replay_key());

    let mut acquired: BTreeMap<String, NaiveDate> = BTreeMap::new();
    for mv in ordered {
        if mv.kind.adds_symbol() {
            acquired.insert(mv.symbol.clone(), mv.effective_date);
        } else if mv.kind.removes_symbol() {
            acquired.remove(&mv.symbol);
        }
    }

    let mut holdings = HoldingSet::new();
    for (symbol, date) in acquired {
        match instruments.get(&symbol) {
            Some(inst) => {
                holdings.insert(
                    symbol.clone(),
                    Holding {
                        symbol,
                        acquired: date,
                        tier: inst.tier,
                        tier_cost: inst.tier_cost,
                    },
                );
            }
            None => debug!(%symbol, "symbol absent from instrument set, skipping"),
        }
    }
    holdings
}

/// Replay a whole league's moves into symbol → owning team on `as_of`.
///
/// A removal releases a symbol only when the recorded owner is the team
/// making the move; a stray drop by a non-owner changes nothing. Backs
/// the free-agent checks in unique-ownership leagues.
pub fn ownership_at(moves: &[RosterMove], as_of: NaiveDate) -> HashMap<String, i64> {
    let mut ordered: Vec<&RosterMove> = moves
        .iter()
        .filter(|m| m.effective_date <= as_of)
        .collect();
    ordered.sort_by_key(|m| m.replay_key());

    let mut owners: HashMap<String, i64> = HashMap::new();
    for mv in ordered {
        if mv.kind.adds_symbol() {
            owners.insert(mv.symbol.clone(), mv.team_id);
        } else if mv.kind.removes_symbol() && owners.get(&mv.symbol) == Some(&mv.team_id) {
            owners.remove(&mv.symbol);
        }
    }
    owners
}

// ---------------------------------------------------------------------------
// Async shell
// ---------------------------------------------------------------------------

/// Loads the inputs of the pure folds from the store.
#[derive(Debug, Clone)]
pub struct HoldingsReconstructor {
    store: Store,
}

impl HoldingsReconstructor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// The holding set of one team on `as_of`. Dates before the team's
    /// first move yield an empty set.
    pub async fn holdings_at(
        &self,
        team_id: i64,
        as_of: NaiveDate,
    ) -> Result<HoldingSet, SettleError> {
        let team = self.store.team(team_id).await?;
        let league = self.store.league(team.league_id).await?;
        let instruments = InstrumentSet::new(self.store.instruments(league.season_id).await?);
        let moves = self.store.moves_for_team(team_id).await?;
        Ok(holdings_at(&moves, &instruments, as_of))
    }

    /// League-wide symbol ownership on `as_of`.
    pub async fn ownership_at(
        &self,
        league_id: i64,
        as_of: NaiveDate,
    ) -> Result<HashMap<String, i64>, SettleError> {
        let moves = self.store.moves_for_league(league_id).await?;
        Ok(ownership_at(&moves, as_of))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AddSource, Instrument, MoveKind, TradeDirection};
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn instruments() -> InstrumentSet {
        InstrumentSet::new(
            ["AAA", "BBB", "CCC", "DDD"]
                .iter()
                .enumerate()
                .map(|(i, s)| Instrument {
                    season_id: 1,
                    symbol: s.to_string(),
                    tier: (i + 1) as u8,
                    tier_cost: dec!(10),
                })
                .collect(),
        )
    }

    fn mv(
        id: i64,
        team_id: i64,
        symbol: &str,
        kind: MoveKind,
        eff: &str,
        created: &str,
    ) -> RosterMove {
        RosterMove {
            id,
            team_id,
            symbol: symbol.to_string(),
            kind,
            effective_date: d(eff),
            created_at: ts(created),
        }
    }

    #[test]
    fn test_empty_before_first_move() {
        let moves = vec![mv(1, 1, "AAA", MoveKind::Draft, "2026-03-02", "2026-03-01T10:00:00Z")];
        let holdings = holdings_at(&moves, &instruments(), d("2026-03-01"));
        assert!(holdings.is_empty());
    }

    #[test]
    fn test_draft_then_swap_timeline() {
        let moves = vec![
            mv(1, 1, "AAA", MoveKind::Draft, "2026-03-02", "2026-03-01T10:00:00Z"),
            mv(2, 1, "BBB", MoveKind::Draft, "2026-03-02", "2026-03-01T10:00:00Z"),
            // Swap on the 4th: out AAA, in CCC.
            mv(3, 1, "AAA", MoveKind::Drop, "2026-03-04", "2026-03-03T20:00:00Z"),
            mv(
                4,
                1,
                "CCC",
                MoveKind::Add {
                    via: AddSource::Swap,
                },
                "2026-03-04",
                "2026-03-03T20:00:00Z",
            ),
        ];
        let inst = instruments();

        // Before the swap takes effect.
        let before = holdings_at(&moves, &inst, d("2026-03-03"));
        assert_eq!(before.len(), 2);
        assert!(before.contains_key("AAA"));
        assert!(before.contains_key("BBB"));

        // On the effective date.
        let after = holdings_at(&moves, &inst, d("2026-03-04"));
        assert_eq!(after.len(), 2);
        assert!(!after.contains_key("AAA"));
        assert!(after.contains_key("CCC"));
        assert_eq!(after["CCC"].acquired, d("2026-03-04"));
        // The untouched holding keeps its original acquisition date.
        assert_eq!(after["BBB"].acquired, d("2026-03-02"));
    }

    #[test]
    fn test_same_day_moves_replay_in_created_order() {
        // Drop and re-add the same symbol with the same effective date;
        // creation time decides, so the re-add survives.
        let moves = vec![
            mv(2, 1, "AAA", MoveKind::Drop, "2026-03-04", "2026-03-03T21:00:00Z"),
            mv(1, 1, "AAA", MoveKind::Draft, "2026-03-02", "2026-03-01T10:00:00Z"),
            mv(
                3,
                1,
                "AAA",
                MoveKind::Add {
                    via: AddSource::Swap,
                },
                "2026-03-04",
                "2026-03-03T22:00:00Z",
            ),
        ];
        let holdings = holdings_at(&moves, &instruments(), d("2026-03-04"));
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings["AAA"].acquired, d("2026-03-04"));
    }

    #[test]
    fn test_trade_legs_move_symbols_between_teams() {
        let trade_out = MoveKind::Trade {
            direction: TradeDirection::Outgoing,
            counterparty: 2,
            proposal_id: 9,
        };
        let trade_in = MoveKind::Trade {
            direction: TradeDirection::Incoming,
            counterparty: 1,
            proposal_id: 9,
        };
        let moves = vec![
            mv(1, 1, "AAA", MoveKind::Draft, "2026-03-02", "2026-03-01T10:00:00Z"),
            mv(2, 2, "BBB", MoveKind::Draft, "2026-03-02", "2026-03-01T10:00:00Z"),
            mv(3, 1, "AAA", trade_out, "2026-03-05", "2026-03-04T20:00:00Z"),
            mv(4, 2, "AAA", trade_in, "2026-03-05", "2026-03-04T20:00:00Z"),
        ];
        let inst = instruments();

        let team1 = holdings_at(
            &moves.iter().filter(|m| m.team_id == 1).cloned().collect::<Vec<_>>(),
            &inst,
            d("2026-03-05"),
        );
        assert!(team1.is_empty());

        let team2 = holdings_at(
            &moves.iter().filter(|m| m.team_id == 2).cloned().collect::<Vec<_>>(),
            &inst,
            d("2026-03-05"),
        );
        assert_eq!(team2.len(), 2);
        assert_eq!(team2["AAA"].acquired, d("2026-03-05"));
    }

    #[test]
    fn test_unknown_symbols_are_skipped() {
        let moves = vec![mv(1, 1, "ZZZ", MoveKind::Draft, "2026-03-02", "2026-03-01T10:00:00Z")];
        let holdings = holdings_at(&moves, &instruments(), d("2026-03-02"));
        assert!(holdings.is_empty());
    }

    #[test]
    fn test_drop_of_unheld_symbol_is_inert() {
        let moves = vec![
            mv(1, 1, "AAA", MoveKind::Draft, "2026-03-02", "2026-03-01T10:00:00Z"),
            mv(2, 1, "BBB", MoveKind::Drop, "2026-03-03", "2026-03-02T20:00:00Z"),
        ];
        let holdings = holdings_at(&moves, &instruments(), d("2026-03-03"));
        assert_eq!(holdings.len(), 1);
        assert!(holdings.contains_key("AAA"));
    }

    #[test]
    fn test_ownership_tracks_the_recording_team() {
        let moves = vec![
            mv(1, 1, "AAA", MoveKind::Draft, "2026-03-02", "2026-03-01T10:00:00Z"),
            mv(2, 2, "BBB", MoveKind::Draft, "2026-03-02", "2026-03-01T10:00:00Z"),
            // Team 2 "drops" AAA, which it never owned: no effect.
            mv(3, 2, "AAA", MoveKind::Drop, "2026-03-03", "2026-03-02T20:00:00Z"),
        ];
        let owners = ownership_at(&moves, d("2026-03-03"));
        assert_eq!(owners.get("AAA"), Some(&1));
        assert_eq!(owners.get("BBB"), Some(&2));
    }

    #[test]
    fn test_ownership_releases_on_owner_drop() {
        let moves = vec![
            mv(1, 1, "AAA", MoveKind::Draft, "2026-03-02", "2026-03-01T10:00:00Z"),
            mv(2, 1, "AAA", MoveKind::Drop, "2026-03-04", "2026-03-03T20:00:00Z"),
        ];
        assert_eq!(ownership_at(&moves, d("2026-03-03")).get("AAA"), Some(&1));
        assert!(ownership_at(&moves, d("2026-03-04")).get("AAA").is_none());
    }

    #[tokio::test]
    async fn test_reconstructor_loads_from_store() {
        let store = Store::open_in_memory().await.unwrap();
        let season = store
            .create_season(&crate::types::Season {
                id: 0,
                name: "S".to_string(),
                start_date: d("2026-03-02"),
                trade_deadline: d("2026-05-29"),
                budget_cap: dec!(100),
                score_multiplier: dec!(1),
                first_day_factor: dec!(0.5),
                max_swaps_per_day: 1,
                max_swaps_per_week: 3,
            })
            .await
            .unwrap();
        let league = store
            .create_league(season.id, "L", crate::types::LeagueMode::DuplicatesAllowed)
            .await
            .unwrap();
        let team = store.create_team(league.id, "T", dec!(100)).await.unwrap();
        store
            .populate_instruments(
                season.id,
                &[Instrument {
                    season_id: season.id,
                    symbol: "AAA".to_string(),
                    tier: 1,
                    tier_cost: dec!(20),
                }],
            )
            .await
            .unwrap();
        store
            .append_move(&mv(0, team.id, "AAA", MoveKind::Draft, "2026-03-02", "2026-03-01T10:00:00Z"))
            .await
            .unwrap();

        let reconstructor = HoldingsReconstructor::new(store);
        let holdings = reconstructor.holdings_at(team.id, d("2026-03-02")).await.unwrap();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings["AAA"].tier, 1);

        let none = reconstructor.holdings_at(9999, d("2026-03-02")).await;
        assert!(matches!(none, Err(SettleError::NotFound { .. })));
    }
}
