//! Shared types for the CLOSINGBELL settlement engine.
//!
//! These types form the data model used across all modules: the frozen
//! per-season instrument universe, the append-only roster-move log, the
//! derived holding set, cached day scores, waiver claims and trade
//! proposals. They are designed to be stable so that calendar, ledger,
//! roster, scoring and transaction modules can depend on them without
//! circular references.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A committed roster always holds exactly this many instruments.
pub const ROSTER_SIZE: usize = 8;

/// Instrument tiers run 1 (most expensive) through 5 (cheapest).
pub const TIER_MIN: u8 = 1;
pub const TIER_MAX: u8 = 5;
pub const TIER_COUNT: usize = 5;

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

/// A tradable instrument in a season's universe.
///
/// Tier and tier cost are frozen when the season is populated; every
/// computation receives the season's instruments explicitly rather than
/// consulting any shared registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub season_id: i64,
    pub symbol: String,
    /// Tier 1–5.
    pub tier: u8,
    /// Cost this instrument contributes toward the season budget cap.
    pub tier_cost: Decimal,
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (T{} cost {})", self.symbol, self.tier, self.tier_cost)
    }
}

/// The frozen instrument universe of one season, indexed by symbol.
#[derive(Debug, Clone, Default)]
pub struct InstrumentSet {
    by_symbol: HashMap<String, Instrument>,
}

impl InstrumentSet {
    pub fn new(instruments: Vec<Instrument>) -> Self {
        let by_symbol = instruments
            .into_iter()
            .map(|i| (i.symbol.clone(), i))
            .collect();
        Self { by_symbol }
    }

    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.by_symbol.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.by_symbol.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    /// Symbols in deterministic (sorted) order.
    pub fn symbols(&self) -> Vec<String> {
        let mut s: Vec<String> = self.by_symbol.keys().cloned().collect();
        s.sort();
        s
    }
}

// ---------------------------------------------------------------------------
// Roster moves (append-only facts)
// ---------------------------------------------------------------------------

/// How an ADD move came about — a direct swap or a won waiver claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum AddSource {
    Swap,
    Waiver { claim_id: i64 },
}

/// Which side of a trade a TRADE move records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDirection {
    Outgoing,
    Incoming,
}

/// The kind of a roster move, with per-kind metadata.
///
/// Modelled as a tagged union so the replay fold can match exhaustively;
/// the JSON form is what the store persists in the move's detail column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MoveKind {
    Draft,
    Add {
        via: AddSource,
    },
    Drop,
    Trade {
        direction: TradeDirection,
        counterparty: i64,
        proposal_id: i64,
    },
}

impl MoveKind {
    /// Discriminant stored alongside the JSON detail for indexed filtering.
    pub fn tag(&self) -> &'static str {
        match self {
            MoveKind::Draft => "DRAFT",
            MoveKind::Add { .. } => "ADD",
            MoveKind::Drop => "DROP",
            MoveKind::Trade { .. } => "TRADE",
        }
    }

    /// Whether replaying this move inserts the symbol into the holding set.
    pub fn adds_symbol(&self) -> bool {
        matches!(
            self,
            MoveKind::Draft
                | MoveKind::Add { .. }
                | MoveKind::Trade {
                    direction: TradeDirection::Incoming,
                    ..
                }
        )
    }

    /// Whether replaying this move removes the symbol from the holding set.
    pub fn removes_symbol(&self) -> bool {
        matches!(
            self,
            MoveKind::Drop
                | MoveKind::Trade {
                    direction: TradeDirection::Outgoing,
                    ..
                }
        )
    }

    /// Whether this move consumes a daily/weekly swap slot.
    /// Waiver-sourced adds do not: the claim itself already counted.
    pub fn counts_toward_swap_limit(&self) -> bool {
        matches!(
            self,
            MoveKind::Add {
                via: AddSource::Swap
            }
        )
    }
}

/// One append-only roster-move fact. Never updated or deleted; the sole
/// source of truth for ownership history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterMove {
    /// Store-assigned identity (0 until persisted). Part of the replay
    /// tie-break so same-instant moves still have a total order.
    pub id: i64,
    pub team_id: i64,
    pub symbol: String,
    pub kind: MoveKind,
    /// First trading day this move affects holdings.
    pub effective_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl RosterMove {
    /// Explicit, stored replay ordering: effective date, then creation
    /// time, then identity. Never rely on storage default order.
    pub fn replay_key(&self) -> (NaiveDate, DateTime<Utc>, i64) {
        (self.effective_date, self.created_at, self.id)
    }
}

impl fmt::Display for RosterMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} team {} {} {} eff {}",
            self.id,
            self.team_id,
            self.kind.tag(),
            self.symbol,
            self.effective_date,
        )
    }
}

// ---------------------------------------------------------------------------
// Holdings (derived)
// ---------------------------------------------------------------------------

/// A single held instrument, derived by replaying the move log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    /// Effective date of the move that brought the symbol onto the roster.
    pub acquired: NaiveDate,
    pub tier: u8,
    pub tier_cost: Decimal,
}

/// Symbol → holding, ordered for deterministic iteration.
pub type HoldingSet = BTreeMap<String, Holding>;

// ---------------------------------------------------------------------------
// Calendar materialization
// ---------------------------------------------------------------------------

/// One persisted calendar row: classification plus resolved neighbor
/// links for a single date. The pure calendar rule is authoritative;
/// these rows exist for external readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub is_trading: bool,
    /// Last trading day strictly before `date`.
    pub prev_trading: NaiveDate,
    /// `date` itself when trading, otherwise the next trading day after.
    pub next_trading: NaiveDate,
}

// ---------------------------------------------------------------------------
// Prices
// ---------------------------------------------------------------------------

/// An adjusted end-of-day close as cached in the price ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub close: Decimal,
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Day scores (derived cache entries)
// ---------------------------------------------------------------------------

/// Per-symbol scoring detail inside a day score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolScore {
    pub symbol: String,
    pub close: Decimal,
    pub prev_close: Decimal,
    /// (close − prev_close) / prev_close, rounded to 4 dp.
    pub day_return: Decimal,
    /// Points contributed, after multiplier and any first-day factor.
    pub points: Decimal,
    /// True when the holding's acquisition date equals the scoring date.
    pub first_day: bool,
}

/// One team's score for one date. Derived and safe to recompute; equality
/// of recomputation is the engine's core invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayScore {
    pub team_id: i64,
    pub date: NaiveDate,
    pub total: Decimal,
    pub breakdown: Vec<SymbolScore>,
    /// Symbols that could not be scored for lack of price data. A zero
    /// contribution with a recorded gap, never an error.
    pub missing: Vec<String>,
    /// False on weekends/holidays so callers do not mistake the zero for
    /// a real trading outcome.
    pub is_trading_day: bool,
    pub computed_at: DateTime<Utc>,
}

impl DayScore {
    /// The fixed zero score reported for non-trading dates.
    pub fn non_trading(team_id: i64, date: NaiveDate, computed_at: DateTime<Utc>) -> Self {
        Self {
            team_id,
            date,
            total: Decimal::ZERO,
            breakdown: Vec::new(),
            missing: Vec::new(),
            is_trading_day: false,
            computed_at,
        }
    }
}

impl fmt::Display for DayScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "team {} {} -> {} pts ({} scored, {} missing{})",
            self.team_id,
            self.date,
            self.total,
            self.breakdown.len(),
            self.missing.len(),
            if self.is_trading_day {
                ""
            } else {
                ", non-trading"
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Waiver claims
// ---------------------------------------------------------------------------

/// Lifecycle of a waiver claim. Transitions run PENDING → WON | LOST |
/// CANCELLED and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    Pending,
    Won,
    Lost,
    Cancelled,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "PENDING",
            ClaimStatus::Won => "WON",
            ClaimStatus::Lost => "LOST",
            ClaimStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ClaimStatus::Pending),
            "WON" => Some(ClaimStatus::Won),
            "LOST" => Some(ClaimStatus::Lost),
            "CANCELLED" => Some(ClaimStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether a transition from `self` to `next` is legal. Re-applying
    /// the status already in place is treated as a no-op by callers.
    pub fn can_become(&self, next: ClaimStatus) -> bool {
        *self == ClaimStatus::Pending && next != ClaimStatus::Pending
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt to acquire a free agent in a unique-ownership league.
/// Immutable except for its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaiverClaim {
    pub id: i64,
    pub team_id: i64,
    pub add_symbol: String,
    pub drop_symbol: String,
    pub bid: Decimal,
    pub status: ClaimStatus,
    pub effective_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl fmt::Display for WaiverClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "claim #{} team {} +{} -{} bid {} [{}] eff {}",
            self.id,
            self.team_id,
            self.add_symbol,
            self.drop_symbol,
            self.bid,
            self.status,
            self.effective_date,
        )
    }
}

// ---------------------------------------------------------------------------
// Trade proposals
// ---------------------------------------------------------------------------

/// Lifecycle of a trade proposal. PENDING → ACCEPTED | REJECTED |
/// CANCELLED | EXPIRED, one-directional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Expired,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Accepted => "ACCEPTED",
            TradeStatus::Rejected => "REJECTED",
            TradeStatus::Cancelled => "CANCELLED",
            TradeStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TradeStatus::Pending),
            "ACCEPTED" => Some(TradeStatus::Accepted),
            "REJECTED" => Some(TradeStatus::Rejected),
            "CANCELLED" => Some(TradeStatus::Cancelled),
            "EXPIRED" => Some(TradeStatus::Expired),
            _ => None,
        }
    }

    pub fn can_become(&self, next: TradeStatus) -> bool {
        *self == TradeStatus::Pending && next != TradeStatus::Pending
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bilateral multi-symbol exchange between two rosters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub id: i64,
    pub league_id: i64,
    pub from_team: i64,
    pub to_team: i64,
    /// Symbols the proposer gives away.
    pub offered: Vec<String>,
    /// Symbols the proposer asks for.
    pub requested: Vec<String>,
    pub status: TradeStatus,
    pub effective_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl fmt::Display for TradeProposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trade #{} {}->{} offers [{}] for [{}] [{}] eff {}",
            self.id,
            self.from_team,
            self.to_team,
            self.offered.join(", "),
            self.requested.join(", "),
            self.status,
            self.effective_date,
        )
    }
}

// ---------------------------------------------------------------------------
// Seasons, leagues, teams
// ---------------------------------------------------------------------------

/// Season-wide scoring and transaction parameters, frozen at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub id: i64,
    pub name: String,
    /// First scoring day; standings accumulate from here.
    pub start_date: NaiveDate,
    /// Last trading day a trade may take effect (inclusive).
    pub trade_deadline: NaiveDate,
    pub budget_cap: Decimal,
    pub score_multiplier: Decimal,
    /// Applied to a holding's points on its first scoring day only; < 1.
    pub first_day_factor: Decimal,
    pub max_swaps_per_day: u32,
    pub max_swaps_per_week: u32,
}

/// Whether a league enforces unique ownership (waiver auctions) or lets
/// every team hold any instrument (direct swaps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeagueMode {
    UniqueOwnership,
    DuplicatesAllowed,
}

impl LeagueMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeagueMode::UniqueOwnership => "UNIQUE",
            LeagueMode::DuplicatesAllowed => "DUPLICATES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNIQUE" => Some(LeagueMode::UniqueOwnership),
            "DUPLICATES" => Some(LeagueMode::DuplicatesAllowed),
            _ => None,
        }
    }
}

/// League lifecycle. Roster-changing transactions are accepted only while
/// the league is in its active scoring phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaguePhase {
    Setup,
    Drafting,
    Active,
    Completed,
}

impl LeaguePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaguePhase::Setup => "SETUP",
            LeaguePhase::Drafting => "DRAFTING",
            LeaguePhase::Active => "ACTIVE",
            LeaguePhase::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SETUP" => Some(LeaguePhase::Setup),
            "DRAFTING" => Some(LeaguePhase::Drafting),
            "ACTIVE" => Some(LeaguePhase::Active),
            "COMPLETED" => Some(LeaguePhase::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct League {
    pub id: i64,
    pub season_id: i64,
    pub name: String,
    pub mode: LeagueMode,
    pub phase: LeaguePhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub league_id: i64,
    pub name: String,
    /// Remaining free-agent acquisition budget (FAAB). Monotonically
    /// non-increasing, never negative.
    pub budget_remaining: Decimal,
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (#{}, league {}, budget {})",
            self.name, self.id, self.league_id, self.budget_remaining,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the settlement engine.
///
/// Validation failures always carry a specific, user-actionable reason.
/// Missing price data is never an error — it degrades into a recorded gap.
#[derive(Debug, thiserror::Error)]
pub enum SettleError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl SettleError {
    pub fn validation(reason: impl Into<String>) -> Self {
        SettleError::Validation(reason.into())
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        SettleError::NotFound { entity, id }
    }
}

impl From<sqlx::Error> for SettleError {
    fn from(e: sqlx::Error) -> Self {
        SettleError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for SettleError {
    fn from(e: serde_json::Error) -> Self {
        SettleError::Corrupt(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
