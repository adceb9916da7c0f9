//! Cached day scores.
//!
//! The cache is a pure derivative of the source facts: every row can be
//! deleted at any time and the next read rebuilds it to the identical
//! value. Writes are upserts keyed by (team, date), so concurrent
//! recomputation converges instead of duplicating rows.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt;
use tracing::info;

use crate::scoring::ScoringEngine;
use crate::store::Store;
use crate::types::{DayScore, SettleError};

/// Accumulated score over a date range, one entry per trading day.
#[derive(Debug, Clone)]
pub struct RangeScore {
    pub team_id: i64,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub total: Decimal,
    pub days: Vec<DayScore>,
}

impl fmt::Display for RangeScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "team {} {}..{}: {} pts over {} trading days",
            self.team_id,
            self.from,
            self.to,
            self.total,
            self.days.len()
        )
    }
}

/// Read-through cache over [`ScoringEngine`].
#[derive(Debug, Clone)]
pub struct ScoreCache {
    store: Store,
    engine: ScoringEngine,
}

impl ScoreCache {
    pub fn new(store: Store, engine: ScoringEngine) -> Self {
        Self { store, engine }
    }

    pub fn engine(&self) -> &ScoringEngine {
        &self.engine
    }

    /// The cached score for (team, date), computing and storing it on a
    /// miss. `force` recomputes and overwrites unconditionally.
    pub async fn get_or_compute(
        &self,
        team_id: i64,
        date: NaiveDate,
        force: bool,
    ) -> Result<DayScore, SettleError> {
        if !force {
            if let Some(cached) = self.store.day_score(team_id, date).await? {
                return Ok(cached);
            }
        }
        let score = self.engine.day_score(team_id, date).await?;
        self.store.upsert_day_score(&score).await?;
        Ok(score)
    }

    /// Drop cached rows matching the filters; `None` means "any".
    /// Returns the number of rows removed. Source facts are untouched,
    /// so the next read recomputes.
    pub async fn invalidate(
        &self,
        team_id: Option<i64>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<u64, SettleError> {
        let removed = self.store.delete_day_scores(team_id, from, to).await?;
        info!(?team_id, ?from, ?to, removed, "invalidated cached day scores");
        Ok(removed)
    }

    /// Accumulate scores over every trading day in `[from, to]`,
    /// hydrating cache misses along the way. Non-trading days are not
    /// visited at all.
    pub async fn range_score(
        &self,
        team_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<RangeScore, SettleError> {
        let mut days = Vec::new();
        let mut total = Decimal::ZERO;
        for date in self.engine.calendar().trading_days_between(from, to) {
            let score = self.get_or_compute(team_id, date, false).await?;
            total += score.total;
            days.push(score);
        }
        Ok(RangeScore {
            team_id,
            from,
            to,
            total,
            days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::TradingCalendar;
    use crate::types::{Instrument, LeagueMode, MoveKind, PriceBar, RosterMove, Season};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    async fn cache_with_team(store: &Store) -> (ScoreCache, i64) {
        let season = store
            .create_season(&Season {
                id: 0,
                name: "2026".to_string(),
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
            .create_league(season.id, "L", LeagueMode::DuplicatesAllowed)
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
            .append_move(&RosterMove {
                id: 0,
                team_id: team.id,
                symbol: "AAA".to_string(),
                kind: MoveKind::Draft,
                effective_date: d("2026-03-02"),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let engine = ScoringEngine::new(store.clone(), TradingCalendar::us_equities());
        (ScoreCache::new(store.clone(), engine), team.id)
    }

    async fn put_price(store: &Store, symbol: &str, date: &str, close: Decimal) {
        store
            .upsert_price(&PriceBar {
                symbol: symbol.to_string(),
                date: d(date),
                close,
                fetched_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_miss_computes_and_stores() {
        let store = Store::open_in_memory().await.unwrap();
        let (cache, team_id) = cache_with_team(&store).await;
        put_price(&store, "AAA", "2026-03-02", dec!(100)).await;
        put_price(&store, "AAA", "2026-03-03", dec!(104)).await;

        assert!(store.day_score(team_id, d("2026-03-03")).await.unwrap().is_none());
        let score = cache.get_or_compute(team_id, d("2026-03-03"), false).await.unwrap();
        assert_eq!(score.total, dec!(4.0000));

        let stored = store.day_score(team_id, d("2026-03-03")).await.unwrap().unwrap();
        assert_eq!(stored.total, score.total);
        assert_eq!(stored.breakdown, score.breakdown);
    }

    #[tokio::test]
    async fn test_hit_returns_stored_row_without_recompute() {
        let store = Store::open_in_memory().await.unwrap();
        let (cache, team_id) = cache_with_team(&store).await;
        put_price(&store, "AAA", "2026-03-02", dec!(100)).await;
        put_price(&store, "AAA", "2026-03-03", dec!(104)).await;
        let first = cache.get_or_compute(team_id, d("2026-03-03"), false).await.unwrap();

        // A price revision does not reach readers until forced.
        put_price(&store, "AAA", "2026-03-03", dec!(108)).await;
        let hit = cache.get_or_compute(team_id, d("2026-03-03"), false).await.unwrap();
        assert_eq!(hit.total, first.total);
        assert_eq!(hit.computed_at, first.computed_at);

        let forced = cache.get_or_compute(team_id, d("2026-03-03"), true).await.unwrap();
        assert_eq!(forced.total, dec!(8.0000));
    }

    #[tokio::test]
    async fn test_invalidate_then_reread_recomputes() {
        let store = Store::open_in_memory().await.unwrap();
        let (cache, team_id) = cache_with_team(&store).await;
        put_price(&store, "AAA", "2026-03-02", dec!(100)).await;
        put_price(&store, "AAA", "2026-03-03", dec!(104)).await;
        cache.get_or_compute(team_id, d("2026-03-03"), false).await.unwrap();

        put_price(&store, "AAA", "2026-03-03", dec!(106)).await;
        let removed = cache.invalidate(Some(team_id), None, None).await.unwrap();
        assert_eq!(removed, 1);

        let fresh = cache.get_or_compute(team_id, d("2026-03-03"), false).await.unwrap();
        assert_eq!(fresh.total, dec!(6.0000));
    }

    #[tokio::test]
    async fn test_range_score_visits_only_trading_days() {
        let store = Store::open_in_memory().await.unwrap();
        let (cache, team_id) = cache_with_team(&store).await;
        put_price(&store, "AAA", "2026-03-02", dec!(100)).await;
        put_price(&store, "AAA", "2026-03-03", dec!(102)).await;
        put_price(&store, "AAA", "2026-03-04", dec!(102)).await;
        put_price(&store, "AAA", "2026-03-05", dec!(102)).await;
        put_price(&store, "AAA", "2026-03-06", dec!(104.04)).await;

        // Tuesday through the following Monday spans one weekend.
        let range = cache.range_score(team_id, d("2026-03-03"), d("2026-03-09")).await.unwrap();
        assert_eq!(range.days.len(), 5);
        assert!(range.days.iter().all(|s| s.is_trading_day));
        // +2%, flat, flat, +2%, then Monday missing its close → 0.
        assert_eq!(range.total, dec!(4.0000));
        assert_eq!(range.days[4].missing, vec!["AAA".to_string()]);
    }

    #[tokio::test]
    async fn test_rebuilt_cache_matches_original_rows() {
        let store = Store::open_in_memory().await.unwrap();
        let (cache, team_id) = cache_with_team(&store).await;
        put_price(&store, "AAA", "2026-03-02", dec!(97.13)).await;
        put_price(&store, "AAA", "2026-03-03", dec!(98.41)).await;
        put_price(&store, "AAA", "2026-03-04", dec!(95.77)).await;
        put_price(&store, "AAA", "2026-03-05", dec!(96.02)).await;

        let first = cache.range_score(team_id, d("2026-03-02"), d("2026-03-05")).await.unwrap();
        let removed = cache.invalidate(Some(team_id), None, None).await.unwrap();
        assert_eq!(removed, 4);
        let second = cache.range_score(team_id, d("2026-03-02"), d("2026-03-05")).await.unwrap();

        assert_eq!(first.total, second.total);
        for (a, b) in first.days.iter().zip(second.days.iter()) {
            assert_eq!(a.total, b.total);
            assert_eq!(a.breakdown, b.breakdown);
            assert_eq!(a.missing, b.missing);
        }
    }
}
