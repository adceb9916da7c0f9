//! Trading calendar for settlement.
//!
//! Deterministic, pure logic. No IO (apart from the explicit year
//! materialization), no wall-clock, no randomness: every query answers
//! the same way forever for the same inputs, which is what lets replays
//! and audits reproduce historical settlements.
//!
//! Rules:
//! - Trading days are Monday–Friday, excluding a built-in table of US
//!   market holidays for 2023–2026 plus any configured extras.
//! - Regular session: 09:30–16:00 exchange-local time, modelled as a
//!   fixed UTC offset (daylight saving ignored as a known approximation).
//! - The open instant counts as market-open; the close instant does not.
//!
//! All queries are total: far outside any materialized table they fall
//! back to the weekday/holiday rule directly.

use anyhow::{Context, Result};
use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc, Weekday,
};
use std::collections::BTreeSet;
use std::fmt;
use tracing::info;

use crate::config::ExchangeConfig;
use crate::store::Store;
use crate::types::{CalendarDay, SettleError};

/// Upper bound when scanning for an adjacent trading day. No market gap
/// comes anywhere near this, so the loops stay total without panicking
/// at the calendar's edge.
const MAX_SCAN_DAYS: usize = 366;

// ---------------------------------------------------------------------------
// TradingCalendar
// ---------------------------------------------------------------------------

/// Classifies dates as trading/non-trading and instants as in/out of the
/// regular session. Holds the full holiday set and the session window;
/// cheap to clone, so each engine keeps its own copy.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
    /// Exchange-local = UTC + offset (negative for US markets).
    utc_offset: Duration,
    open_secs: u32,
    close_secs: u32,
}

impl TradingCalendar {
    /// US equities defaults: built-in holiday table, UTC-5, 09:30–16:00.
    pub fn us_equities() -> Self {
        Self {
            holidays: builtin_us_holidays(),
            utc_offset: Duration::hours(-5),
            open_secs: 9 * 3600 + 30 * 60,
            close_secs: 16 * 3600,
        }
    }

    /// Build from the `[exchange]` config section: the built-in holiday
    /// table plus configured extras, and the configured session window.
    pub fn from_config(cfg: &ExchangeConfig) -> Result<Self> {
        let open = NaiveTime::parse_from_str(&cfg.session_open, "%H:%M")
            .with_context(|| format!("invalid session_open: {}", cfg.session_open))?;
        let close = NaiveTime::parse_from_str(&cfg.session_close, "%H:%M")
            .with_context(|| format!("invalid session_close: {}", cfg.session_close))?;
        let mut holidays = builtin_us_holidays();
        holidays.extend(cfg.extra_holidays.iter().copied());
        Ok(Self {
            holidays,
            utc_offset: Duration::hours(cfg.utc_offset_hours as i64),
            open_secs: open.num_seconds_from_midnight(),
            close_secs: close.num_seconds_from_midnight(),
        })
    }

    // -- Trading-day queries ------------------------------------------------

    /// Returns `true` if `date` is a trading day: a weekday that is not
    /// in the holiday set.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        match date.weekday() {
            Weekday::Sat | Weekday::Sun => false,
            _ => !self.holidays.contains(&date),
        }
    }

    /// The first trading day on or after `date` — `date` itself if it
    /// already trades.
    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date;
        for _ in 0..MAX_SCAN_DAYS {
            if self.is_trading_day(d) {
                return d;
            }
            d = match d.succ_opt() {
                Some(next) => next,
                None => return d,
            };
        }
        d
    }

    /// The last trading day strictly before `date`.
    pub fn prev_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date;
        for _ in 0..MAX_SCAN_DAYS {
            d = match d.pred_opt() {
                Some(prev) => prev,
                None => return d,
            };
            if self.is_trading_day(d) {
                return d;
            }
        }
        d
    }

    /// All trading days in `[start, end]`, inclusive on both ends, in
    /// ascending order. An inverted range yields an empty list.
    pub fn trading_days_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut d = start;
        while d <= end {
            if self.is_trading_day(d) {
                days.push(d);
            }
            d = match d.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        days
    }

    // -- Session-instant queries --------------------------------------------

    /// Returns `true` if `at` falls within the regular session on a
    /// trading day: `open ≤ time < close` exchange-local.
    pub fn is_market_open(&self, at: DateTime<Utc>) -> bool {
        let local = self.local(at);
        if !self.is_trading_day(local.date()) {
            return false;
        }
        let secs = local.time().num_seconds_from_midnight();
        secs >= self.open_secs && secs < self.close_secs
    }

    /// The trading day a transaction created at `at` takes effect: the
    /// first trading day strictly after the exchange-local session date.
    /// Never the submission day itself, so changes are always forward-
    /// dated.
    pub fn effective_date_for(&self, at: DateTime<Utc>) -> NaiveDate {
        let date = self.local(at).date();
        self.next_trading_day(day_after(date))
    }

    fn local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        (at + self.utc_offset).naive_utc()
    }

    // -- Materialization ----------------------------------------------------

    /// Classification rows for every date of `year`, in order. Pure; the
    /// store writes them, external readers consume them.
    pub fn year_classification(&self, year: i32) -> Vec<CalendarDay> {
        let mut rows = Vec::with_capacity(366);
        let Some(mut d) = NaiveDate::from_ymd_opt(year, 1, 1) else {
            return rows;
        };
        while d.year() == year {
            rows.push(CalendarDay {
                date: d,
                is_trading: self.is_trading_day(d),
                prev_trading: self.prev_trading_day(d),
                next_trading: self.next_trading_day(d),
            });
            d = match d.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        rows
    }

    /// (Re)writes the stored classification for every date of `year` in
    /// one transaction. Safe to re-run; re-running replaces the rows with
    /// identical content.
    pub async fn populate_year(
        &self,
        store: &Store,
        year: i32,
    ) -> Result<CalendarSummary, SettleError> {
        let rows = self.year_classification(year);
        let trading_days = rows.iter().filter(|r| r.is_trading).count() as u32;
        let summary = CalendarSummary {
            year,
            total_days: rows.len() as u32,
            trading_days,
        };
        store.replace_calendar_year(year, &rows).await?;
        info!(
            year,
            total_days = summary.total_days,
            trading_days = summary.trading_days,
            "calendar year materialized"
        );
        Ok(summary)
    }
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::us_equities()
    }
}

/// Result of a year materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarSummary {
    pub year: i32,
    pub total_days: u32,
    pub trading_days: u32,
}

impl fmt::Display for CalendarSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} trading days of {}",
            self.year, self.trading_days, self.total_days,
        )
    }
}

fn day_after(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

// ---------------------------------------------------------------------------
// Holiday table 2023–2026
// ---------------------------------------------------------------------------

/// Built-in US market holidays, observed dates for 2023–2026. Later
/// years come in through `extra_holidays` in the exchange config.
fn builtin_us_holidays() -> BTreeSet<NaiveDate> {
    const HOLIDAYS: &[(i32, u32, u32)] = &[
        // -- 2023 --
        (2023, 1, 2),   // New Year's Day (observed Mon)
        (2023, 1, 16),  // MLK Day
        (2023, 2, 20),  // Presidents' Day
        (2023, 4, 7),   // Good Friday
        (2023, 5, 29),  // Memorial Day
        (2023, 6, 19),  // Juneteenth
        (2023, 7, 4),   // Independence Day
        (2023, 9, 4),   // Labor Day
        (2023, 11, 23), // Thanksgiving
        (2023, 12, 25), // Christmas
        // -- 2024 --
        (2024, 1, 1),   // New Year's Day
        (2024, 1, 15),  // MLK Day
        (2024, 2, 19),  // Presidents' Day
        (2024, 3, 29),  // Good Friday
        (2024, 5, 27),  // Memorial Day
        (2024, 6, 19),  // Juneteenth
        (2024, 7, 4),   // Independence Day
        (2024, 9, 2),   // Labor Day
        (2024, 11, 28), // Thanksgiving
        (2024, 12, 25), // Christmas
        // -- 2025 --
        (2025, 1, 1),   // New Year's Day
        (2025, 1, 20),  // MLK Day
        (2025, 2, 17),  // Presidents' Day
        (2025, 4, 18),  // Good Friday
        (2025, 5, 26),  // Memorial Day
        (2025, 6, 19),  // Juneteenth
        (2025, 7, 4),   // Independence Day
        (2025, 9, 1),   // Labor Day
        (2025, 11, 27), // Thanksgiving
        (2025, 12, 25), // Christmas
        // -- 2026 --
        (2026, 1, 1),   // New Year's Day
        (2026, 1, 19),  // MLK Day
        (2026, 2, 16),  // Presidents' Day
        (2026, 4, 3),   // Good Friday
        (2026, 5, 25),  // Memorial Day
        (2026, 6, 19),  // Juneteenth
        (2026, 7, 3),   // Independence Day (observed — July 4 falls on Saturday)
        (2026, 9, 7),   // Labor Day
        (2026, 11, 26), // Thanksgiving
        (2026, 12, 25), // Christmas
    ];
    HOLIDAYS
        .iter()
        .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
        .collect()
}

// ---------------------------------------------------------------------------
// Unit tests (fast, no IO)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn cal() -> TradingCalendar {
        TradingCalendar::us_equities()
    }

    /// An ordinary Monday trades; the surrounding weekend does not.
    #[test]
    fn test_weekdays_trade_weekends_do_not() {
        assert!(cal().is_trading_day(d("2026-03-02"))); // Monday
        assert!(cal().is_trading_day(d("2026-03-06"))); // Friday
        assert!(!cal().is_trading_day(d("2026-03-07"))); // Saturday
        assert!(!cal().is_trading_day(d("2026-03-08"))); // Sunday
    }

    /// Good Friday 2026 falls on a weekday but is a listed holiday.
    #[test]
    fn test_good_friday_2026_is_not_trading() {
        assert!(!cal().is_trading_day(d("2026-04-03")));
    }

    /// July 4 2026 is a Saturday, so the observed holiday is Friday July 3.
    #[test]
    fn test_observed_independence_day_2026() {
        assert!(!cal().is_trading_day(d("2026-07-03")));
    }

    /// A date already trading maps to itself.
    #[test]
    fn test_next_trading_day_is_identity_on_trading_days() {
        assert_eq!(cal().next_trading_day(d("2026-03-02")), d("2026-03-02"));
    }

    #[test]
    fn test_next_trading_day_skips_weekend() {
        assert_eq!(cal().next_trading_day(d("2026-03-07")), d("2026-03-09")); // Sat → Mon
        assert_eq!(cal().next_trading_day(d("2026-03-08")), d("2026-03-09")); // Sun → Mon
    }

    /// Good Friday rolls forward over the holiday weekend to Monday.
    #[test]
    fn test_next_trading_day_skips_holiday_weekend() {
        assert_eq!(cal().next_trading_day(d("2026-04-03")), d("2026-04-06"));
    }

    #[test]
    fn test_prev_trading_day_is_strictly_earlier() {
        assert_eq!(cal().prev_trading_day(d("2026-03-03")), d("2026-03-02"));
        assert_eq!(cal().prev_trading_day(d("2026-03-09")), d("2026-03-06")); // Mon → Fri
        assert_eq!(cal().prev_trading_day(d("2026-04-06")), d("2026-04-02")); // over Good Friday
    }

    #[test]
    fn test_trading_days_between_counts_one_week() {
        let days = cal().trading_days_between(d("2026-03-02"), d("2026-03-08"));
        assert_eq!(
            days,
            vec![
                d("2026-03-02"),
                d("2026-03-03"),
                d("2026-03-04"),
                d("2026-03-05"),
                d("2026-03-06"),
            ]
        );
    }

    #[test]
    fn test_trading_days_between_is_inclusive_on_both_ends() {
        let days = cal().trading_days_between(d("2026-03-02"), d("2026-03-02"));
        assert_eq!(days, vec![d("2026-03-02")]);
    }

    #[test]
    fn test_trading_days_between_inverted_range_is_empty() {
        assert!(cal()
            .trading_days_between(d("2026-03-09"), d("2026-03-02"))
            .is_empty());
    }

    /// 15:00 UTC = 10:00 exchange-local on a Monday → mid-session.
    #[test]
    fn test_mid_session_is_open() {
        assert!(cal().is_market_open(ts("2026-03-02T15:00:00Z")));
    }

    /// The open instant is in-session; the close instant is not.
    #[test]
    fn test_session_boundaries() {
        assert!(cal().is_market_open(ts("2026-03-02T14:30:00Z"))); // 09:30 local
        assert!(!cal().is_market_open(ts("2026-03-02T14:29:59Z"))); // 09:29:59
        assert!(!cal().is_market_open(ts("2026-03-02T21:00:00Z"))); // 16:00
    }

    #[test]
    fn test_weekend_and_holiday_are_closed() {
        assert!(!cal().is_market_open(ts("2026-03-07T15:00:00Z"))); // Saturday
        assert!(!cal().is_market_open(ts("2026-04-03T15:00:00Z"))); // Good Friday
    }

    /// Even a pre-open submission is forward-dated to the next trading
    /// day, never the submission day itself.
    #[test]
    fn test_effective_date_is_never_the_submission_day() {
        // 13:00 UTC = 08:00 local, Monday, before the open.
        assert_eq!(
            cal().effective_date_for(ts("2026-03-02T13:00:00Z")),
            d("2026-03-03")
        );
    }

    /// Created mid-session → effective the next trading day.
    #[test]
    fn test_effective_date_during_session_is_next_day() {
        assert_eq!(
            cal().effective_date_for(ts("2026-03-02T15:00:00Z")),
            d("2026-03-03")
        );
    }

    /// Created Friday after the close → effective Monday.
    #[test]
    fn test_effective_date_after_close_rolls_over_weekend() {
        // 22:00 UTC Friday = 17:00 local.
        assert_eq!(
            cal().effective_date_for(ts("2026-03-06T22:00:00Z")),
            d("2026-03-09")
        );
    }

    /// A UTC timestamp shortly after midnight is still the previous
    /// evening exchange-local; the effective day follows the session
    /// date, not the UTC date.
    #[test]
    fn test_effective_date_uses_session_date_not_utc_date() {
        // 2026-03-03 01:00 UTC = 2026-03-02 20:00 local (Monday evening).
        assert_eq!(
            cal().effective_date_for(ts("2026-03-03T01:00:00Z")),
            d("2026-03-03")
        );
    }

    /// Created on Saturday → effective Monday.
    #[test]
    fn test_effective_date_on_weekend_is_next_trading_day() {
        assert_eq!(
            cal().effective_date_for(ts("2026-03-07T15:00:00Z")),
            d("2026-03-09")
        );
    }

    #[test]
    fn test_from_config_applies_extra_holidays_and_session() {
        let cfg = ExchangeConfig {
            utc_offset_hours: -5,
            session_open: "09:30".to_string(),
            session_close: "16:00".to_string(),
            extra_holidays: vec![d("2026-03-04")],
        };
        let cal = TradingCalendar::from_config(&cfg).unwrap();
        assert!(!cal.is_trading_day(d("2026-03-04"))); // configured extra
        assert!(cal.is_trading_day(d("2026-03-05")));
        assert!(!cal.is_trading_day(d("2026-04-03"))); // built-ins still apply
    }

    #[test]
    fn test_from_config_rejects_bad_session_times() {
        let cfg = ExchangeConfig {
            utc_offset_hours: -5,
            session_open: "half past nine".to_string(),
            session_close: "16:00".to_string(),
            extra_holidays: Vec::new(),
        };
        assert!(TradingCalendar::from_config(&cfg).is_err());
    }

    /// 2026 has 261 weekdays and 10 listed holidays, all on weekdays.
    #[test]
    fn test_year_classification_2026_counts() {
        let rows = cal().year_classification(2026);
        assert_eq!(rows.len(), 365);
        let trading = rows.iter().filter(|r| r.is_trading).count();
        assert_eq!(trading, 251);
    }

    /// Neighbor links on a weekend row bracket the weekend.
    #[test]
    fn test_year_classification_links() {
        let rows = cal().year_classification(2026);
        let saturday = rows
            .iter()
            .find(|r| r.date == d("2026-03-07"))
            .expect("row for 2026-03-07");
        assert!(!saturday.is_trading);
        assert_eq!(saturday.prev_trading, d("2026-03-06"));
        assert_eq!(saturday.next_trading, d("2026-03-09"));

        let monday = rows
            .iter()
            .find(|r| r.date == d("2026-03-02"))
            .expect("row for 2026-03-02");
        assert!(monday.is_trading);
        assert_eq!(monday.next_trading, d("2026-03-02"));
        assert_eq!(monday.prev_trading, d("2026-02-27"));
    }
}
