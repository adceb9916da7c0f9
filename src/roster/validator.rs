//! Roster composition rules.
//!
//! A legal roster holds exactly [`ROSTER_SIZE`] instruments, covers
//! every tier at least once, and keeps its summed tier cost within the
//! season budget cap. Validation never short-circuits: the report
//! carries every violated rule so callers can surface all of them at
//! once.

use rust_decimal::Decimal;
use std::fmt;

use crate::types::{HoldingSet, ROSTER_SIZE, TIER_COUNT, TIER_MAX, TIER_MIN};

/// Outcome of checking a holding set against the composition rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterReport {
    pub valid: bool,
    /// One human-readable reason per violated rule, in rule order.
    pub reasons: Vec<String>,
    pub holding_count: usize,
    pub total_cost: Decimal,
    /// Holdings per tier, index 0 = Tier 1.
    pub tier_counts: [u32; TIER_COUNT],
}

impl fmt::Display for RosterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            write!(
                f,
                "valid ({} holdings, total cost {})",
                self.holding_count, self.total_cost
            )
        } else {
            write!(f, "invalid: {}", self.reasons.join("; "))
        }
    }
}

/// Check a holding set against size, tier coverage, and budget.
pub fn validate(holdings: &HoldingSet, budget_cap: Decimal) -> RosterReport {
    let mut tier_counts = [0u32; TIER_COUNT];
    let mut total_cost = Decimal::ZERO;
    for holding in holdings.values() {
        // A tier outside 1..=5 satisfies no coverage bucket; its cost
        // still occupies the budget.
        if (TIER_MIN..=TIER_MAX).contains(&holding.tier) {
            tier_counts[(holding.tier - TIER_MIN) as usize] += 1;
        }
        total_cost += holding.tier_cost;
    }

    let mut reasons = Vec::new();
    if holdings.len() != ROSTER_SIZE {
        reasons.push(format!(
            "roster has {} holdings, expected {}",
            holdings.len(),
            ROSTER_SIZE
        ));
    }
    for (idx, count) in tier_counts.iter().enumerate() {
        if *count == 0 {
            reasons.push(format!("missing Tier {}", idx + TIER_MIN as usize));
        }
    }
    if total_cost > budget_cap {
        reasons.push(format!(
            "total cost {} exceeds budget {}",
            total_cost, budget_cap
        ));
    }

    RosterReport {
        valid: reasons.is_empty(),
        reasons,
        holding_count: holdings.len(),
        total_cost,
        tier_counts,
    }
}
