//! Price ledger: the engine's read side of the (symbol, date) → close
//! store, plus gap detection and the gap-filling driver.
//!
//! The ledger never invents prices. A date without a close stays a gap
//! until a feed supplies it; scoring degrades gracefully in the
//! meantime. Upserts are idempotent and re-fetching an existing close is
//! explicitly skipped, so running a sync twice is free.

pub mod feed;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::calendar::TradingCalendar;
use crate::store::Store;
use crate::types::{PriceBar, SettleError};
use feed::{FetchFailure, QuoteFeed, SyncReport};

/// Read access and gap management for one season's price series.
///
/// `origin` is the season start: gap detection and syncs never look
/// further back than that.
#[derive(Debug, Clone)]
pub struct PriceLedger {
    store: Store,
    calendar: TradingCalendar,
    origin: NaiveDate,
}

impl PriceLedger {
    pub fn new(store: Store, calendar: TradingCalendar, origin: NaiveDate) -> Self {
        Self {
            store,
            calendar,
            origin,
        }
    }

    /// The stored close for one symbol on one date, if any.
    pub async fn close_on(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<Decimal>, SettleError> {
        Ok(self.store.price(symbol, date).await?.map(|bar| bar.close))
    }

    /// Trading days in `[from, to]` with no stored close for `symbol`,
    /// ascending. Non-trading days are never gaps.
    pub async fn missing_dates(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>, SettleError> {
        let stored: HashSet<NaiveDate> =
            self.store.price_dates(symbol, from, to).await?.into_iter().collect();
        Ok(self
            .calendar
            .trading_days_between(from, to)
            .into_iter()
            .filter(|d| !stored.contains(d))
            .collect())
    }

    /// Fill every gap from the ledger origin through `through` for the
    /// given symbols. Existing closes are skipped, never overwritten;
    /// feed misses and errors are reported, not raised.
    pub async fn ensure_fresh_through(
        &self,
        feed: &dyn QuoteFeed,
        symbols: &[String],
        through: NaiveDate,
    ) -> Result<SyncReport, SettleError> {
        let days = self.calendar.trading_days_between(self.origin, through);
        let mut report = SyncReport::default();

        for symbol in symbols {
            let stored: HashSet<NaiveDate> = self
                .store
                .price_dates(symbol, self.origin, through)
                .await?
                .into_iter()
                .collect();

            for &date in &days {
                report.attempted += 1;
                if stored.contains(&date) {
                    report.skipped += 1;
                    continue;
                }
                match feed.close_on(symbol, date).await {
                    Ok(Some(close)) => {
                        self.store
                            .upsert_price(&PriceBar {
                                symbol: symbol.clone(),
                                date,
                                close,
                                fetched_at: Utc::now(),
                            })
                            .await?;
                        report.fetched += 1;
                    }
                    Ok(None) => report.failed.push(FetchFailure {
                        symbol: symbol.clone(),
                        date,
                        reason: "no close published".to_string(),
                    }),
                    Err(e) => report.failed.push(FetchFailure {
                        symbol: symbol.clone(),
                        date,
                        reason: e.to_string(),
                    }),
                }
            }
        }

        if report.failed.is_empty() {
            info!(%report, through = %through, "price sync complete");
        } else {
            warn!(%report, through = %through, "price sync left gaps");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed::FixtureFeed;
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    async fn ledger() -> PriceLedger {
        let store = Store::open_in_memory().await.unwrap();
        PriceLedger::new(store, TradingCalendar::us_equities(), d("2026-03-02"))
    }

    #[tokio::test]
    async fn test_sync_fills_gaps_then_skips() {
        let ledger = ledger().await;
        let feed = FixtureFeed::new()
            .with_close("AAA", d("2026-03-02"), dec!(100))
            .with_close("AAA", d("2026-03-03"), dec!(101))
            .with_close("AAA", d("2026-03-04"), dec!(102));

        let symbols = vec!["AAA".to_string()];
        let report = ledger
            .ensure_fresh_through(&feed, &symbols, d("2026-03-04"))
            .await
            .unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.skipped, 0);
        assert!(report.failed.is_empty());

        // Idempotent: a second run touches nothing.
        let again = ledger
            .ensure_fresh_through(&feed, &symbols, d("2026-03-04"))
            .await
            .unwrap();
        assert_eq!(again.fetched, 0);
        assert_eq!(again.skipped, 3);

        assert_eq!(
            ledger.close_on("AAA", d("2026-03-03")).await.unwrap(),
            Some(dec!(101))
        );
    }

    #[tokio::test]
    async fn test_sync_reports_misses_and_errors_without_failing() {
        let ledger = ledger().await;
        let feed = FixtureFeed::new()
            .with_close("AAA", d("2026-03-02"), dec!(100))
            // 03-03 absent from the feed entirely.
            .with_failure("AAA", d("2026-03-04"));

        let report = ledger
            .ensure_fresh_through(&feed, &["AAA".to_string()], d("2026-03-04"))
            .await
            .unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].date, d("2026-03-03"));
        assert_eq!(report.failed[0].reason, "no close published");
        assert_eq!(report.failed[1].date, d("2026-03-04"));
        assert!(report.failed[1].reason.contains("simulated fetch failure"));

        // The stored close survived untouched.
        assert_eq!(
            ledger.close_on("AAA", d("2026-03-02")).await.unwrap(),
            Some(dec!(100))
        );
    }

    #[tokio::test]
    async fn test_missing_dates_only_counts_trading_days() {
        let ledger = ledger().await;
        let feed = FixtureFeed::new().with_close("AAA", d("2026-03-03"), dec!(101));
        ledger
            .ensure_fresh_through(&feed, &["AAA".to_string()], d("2026-03-03"))
            .await
            .unwrap();

        // Range spans the weekend 03-07/03-08; only the unpriced trading
        // days come back.
        let missing = ledger
            .missing_dates("AAA", d("2026-03-02"), d("2026-03-09"))
            .await
            .unwrap();
        assert_eq!(
            missing,
            vec![
                d("2026-03-02"),
                d("2026-03-04"),
                d("2026-03-05"),
                d("2026-03-06"),
                d("2026-03-09"),
            ]
        );
    }

    #[tokio::test]
    async fn test_sync_never_looks_before_origin() {
        let ledger = ledger().await;
        let feed = FixtureFeed::new()
            .with_close("AAA", d("2026-02-27"), dec!(99))
            .with_close("AAA", d("2026-03-02"), dec!(100));

        ledger
            .ensure_fresh_through(&feed, &["AAA".to_string()], d("2026-03-02"))
            .await
            .unwrap();
        // The pre-origin Friday was not pulled in.
        assert_eq!(ledger.close_on("AAA", d("2026-02-27")).await.unwrap(), None);
    }
}
