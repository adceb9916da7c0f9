//! CLOSING BELL — deterministic settlement console.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store, and dispatches one operational command: every
//! command is a thin wrapper over a library entry point, so re-running
//! a command is always safe.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime, Utc};
use tracing::info;

use closingbell::calendar::TradingCalendar;
use closingbell::config::AppConfig;
use closingbell::ledger::feed::FixtureFeed;
use closingbell::ledger::PriceLedger;
use closingbell::roster::{validator, HoldingsReconstructor};
use closingbell::scoring::cache::ScoreCache;
use closingbell::scoring::ScoringEngine;
use closingbell::store::Store;
use closingbell::swaps::waivers::WaiverResolver;
use closingbell::trades::TradeEngine;

const BANNER: &str = r#"
  ____ _     ___  ____ ___ _   _  ____   ____  _____ _     _
 / ___| |   / _ \/ ___|_ _| \ | |/ ___| | __ )| ____| |   | |
| |   | |  | | | \___ \| ||  \| | |  _  |  _ \|  _| | |   | |
| |___| |__| |_| |___) | || |\  | |_| | | |_) | |___| |___| |___
 \____|_____\___/|____/___|_| \_|\____| |____/|_____|_____|_____|

  Deterministic settlement for fantasy trading leagues
  v0.1.0
"#;

const USAGE: &str = "\
usage: closingbell <command> [args]

commands:
  calendar <year>                 materialize the trading calendar for a year
  score <team> <date> [--force]   compute one team-day score (force recomputes)
  range <team> <from> <to>        total scores over a date range
  invalidate <team> [from] [to]   drop cached day scores so they recompute
  gaps <season> <date>            report and fixture-fill price ledger gaps
  resolve <league> <date>         resolve pending waiver claims for a date
  expire <league> <as-of>         expire trade proposals dead past the deadline
  diagnose <team> <date>          holdings, roster validity and day score

dates are YYYY-MM-DD; ids are numeric.
";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging(&cfg);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{BANNER}");
        print!("{USAGE}");
        return Ok(());
    };

    info!(
        engine_name = %cfg.engine.name,
        command,
        database = %cfg.database_path(),
        "CLOSING BELL starting up"
    );

    let store = Store::open(cfg.database_path()).await?;
    let calendar = TradingCalendar::from_config(&cfg.exchange)?;

    match command {
        "calendar" => cmd_calendar(&store, &calendar, &args).await,
        "score" => cmd_score(&store, &calendar, &args).await,
        "range" => cmd_range(&store, &calendar, &args).await,
        "invalidate" => cmd_invalidate(&store, &calendar, &args).await,
        "gaps" => cmd_gaps(&cfg, &store, &calendar, &args).await,
        "resolve" => cmd_resolve(&store, &calendar, &args).await,
        "expire" => cmd_expire(&store, &calendar, &args).await,
        "diagnose" => cmd_diagnose(&store, &calendar, &args).await,
        other => {
            print!("{USAGE}");
            bail!("unknown command: {other}");
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// `calendar <year>`: write the year's trading-day classification.
async fn cmd_calendar(store: &Store, calendar: &TradingCalendar, args: &[String]) -> Result<()> {
    let year: i32 = arg(args, 1, "year")?
        .parse()
        .context("<year> must be a four-digit year")?;
    let summary = calendar.populate_year(store, year).await?;
    println!("{summary}");
    Ok(())
}

/// `score <team> <date> [--force]`: one team-day score with breakdown.
async fn cmd_score(store: &Store, calendar: &TradingCalendar, args: &[String]) -> Result<()> {
    let team_id = parse_id(arg(args, 1, "team")?, "team")?;
    let date = parse_day(arg(args, 2, "date")?)?;
    let force = args.get(3).is_some_and(|a| a == "--force");

    let score = score_cache(store, calendar)
        .get_or_compute(team_id, date, force)
        .await?;
    println!("{score}");
    for line in &score.breakdown {
        println!(
            "  {} {} -> {} ret {} = {} pts{}",
            line.symbol,
            line.prev_close,
            line.close,
            line.day_return,
            line.points,
            if line.first_day { " (first day)" } else { "" },
        );
    }
    for symbol in &score.missing {
        println!("  {symbol}: no usable close, contributed 0");
    }
    Ok(())
}

/// `range <team> <from> <to>`: cached scores summed over trading days.
async fn cmd_range(store: &Store, calendar: &TradingCalendar, args: &[String]) -> Result<()> {
    let team_id = parse_id(arg(args, 1, "team")?, "team")?;
    let from = parse_day(arg(args, 2, "from")?)?;
    let to = parse_day(arg(args, 3, "to")?)?;

    let range = score_cache(store, calendar)
        .range_score(team_id, from, to)
        .await?;
    println!("{range}");
    for day in &range.days {
        println!("  {day}");
    }
    Ok(())
}

/// `invalidate <team> [from] [to]`: drop cached rows; they recompute on
/// the next read.
async fn cmd_invalidate(store: &Store, calendar: &TradingCalendar, args: &[String]) -> Result<()> {
    let team_id = parse_id(arg(args, 1, "team")?, "team")?;
    let from = args.get(2).map(|s| parse_day(s)).transpose()?;
    let to = args.get(3).map(|s| parse_day(s)).transpose()?;

    let removed = score_cache(store, calendar)
        .invalidate(Some(team_id), from, to)
        .await?;
    println!("removed {removed} cached day scores for team {team_id}");
    Ok(())
}

/// `gaps <season> <date>`: report missing closes from season start
/// through the given date, fixture-filling first when configured.
async fn cmd_gaps(
    cfg: &AppConfig,
    store: &Store,
    calendar: &TradingCalendar,
    args: &[String],
) -> Result<()> {
    let season_id = parse_id(arg(args, 1, "season")?, "season")?;
    let through = parse_day(arg(args, 2, "date")?)?;

    let season = store.season(season_id).await?;
    let symbols: Vec<String> = store
        .instruments(season_id)
        .await?
        .into_iter()
        .map(|i| i.symbol)
        .collect();
    let ledger = PriceLedger::new(store.clone(), calendar.clone(), season.start_date);

    if cfg.feed.provider == "fixture" {
        let feed = FixtureFeed::from_dir(&cfg.feed.fixture_dir)?;
        let report = ledger.ensure_fresh_through(&feed, &symbols, through).await?;
        println!("sync: {report}");
        for failure in &report.failed {
            println!("  failed: {failure}");
        }
    }

    let mut total = 0;
    for symbol in &symbols {
        let gaps = ledger
            .missing_dates(symbol, season.start_date, through)
            .await?;
        if !gaps.is_empty() {
            total += gaps.len();
            let days: Vec<String> = gaps.iter().map(|d| d.to_string()).collect();
            println!("{symbol}: {} missing ({})", gaps.len(), days.join(", "));
        }
    }
    if total == 0 {
        println!(
            "ledger complete for {} symbols through {through}",
            symbols.len()
        );
    }
    Ok(())
}

/// `resolve <league> <date>`: run the waiver auction for one effective
/// date. Re-running after success is a no-op.
async fn cmd_resolve(store: &Store, calendar: &TradingCalendar, args: &[String]) -> Result<()> {
    let league_id = parse_id(arg(args, 1, "league")?, "league")?;
    let date = parse_day(arg(args, 2, "date")?)?;

    let resolver = WaiverResolver::new(store.clone(), calendar.clone());
    let report = resolver.resolve_claims(league_id, date, Utc::now()).await?;
    println!("{report}");
    for group in &report.groups {
        println!("  {group}");
    }
    Ok(())
}

/// `expire <league> <as-of>`: sweep proposals that can no longer settle
/// inside the trade deadline. The as-of date is taken at midnight UTC.
async fn cmd_expire(store: &Store, calendar: &TradingCalendar, args: &[String]) -> Result<()> {
    let league_id = parse_id(arg(args, 1, "league")?, "league")?;
    let as_of = parse_day(arg(args, 2, "as-of")?)?
        .and_time(NaiveTime::MIN)
        .and_utc();

    let engine = TradeEngine::new(store.clone(), calendar.clone());
    let expired = engine.expire_pending(league_id, as_of).await?;
    println!("expired {expired} pending trade proposals in league {league_id}");
    Ok(())
}

/// `diagnose <team> <date>`: holdings, validation and score in one shot.
async fn cmd_diagnose(store: &Store, calendar: &TradingCalendar, args: &[String]) -> Result<()> {
    let team_id = parse_id(arg(args, 1, "team")?, "team")?;
    let date = parse_day(arg(args, 2, "date")?)?;

    let team = store.team(team_id).await?;
    let league = store.league(team.league_id).await?;
    let season = store.season(league.season_id).await?;
    println!(
        "{team} in {} ({} / {})",
        league.name,
        league.mode.as_str(),
        league.phase.as_str(),
    );

    let holdings = HoldingsReconstructor::new(store.clone())
        .holdings_at(team_id, date)
        .await?;
    println!("holdings as of {date}:");
    for holding in holdings.values() {
        println!(
            "  {} T{} cost {} acquired {}",
            holding.symbol, holding.tier, holding.tier_cost, holding.acquired,
        );
    }

    let report = validator::validate(&holdings, season.budget_cap);
    println!("roster: {report}");

    let score = score_cache(store, calendar)
        .get_or_compute(team_id, date, false)
        .await?;
    println!("score: {score}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn score_cache(store: &Store, calendar: &TradingCalendar) -> ScoreCache {
    ScoreCache::new(
        store.clone(),
        ScoringEngine::new(store.clone(), calendar.clone()),
    )
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .with_context(|| format!("missing <{name}> argument (see usage)"))
}

fn parse_id(value: &str, name: &str) -> Result<i64> {
    value
        .parse()
        .with_context(|| format!("<{name}> must be a numeric id, got {value:?}"))
}

fn parse_day(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("expected a YYYY-MM-DD date, got {value:?}"))
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("closingbell=info"));

    let json_logging = cfg.logging.json || std::env::var("CLOSINGBELL_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
