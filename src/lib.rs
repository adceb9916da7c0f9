//! CLOSING BELL — deterministic settlement engine for fantasy trading
//! leagues.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point. Scores settle once per trading day from
//! official closes; rosters are an append-only move log replayed on
//! demand, so every figure is reproducible from stored facts.

pub mod calendar;
pub mod config;
pub mod types;
pub mod store;
pub mod ledger;
pub mod roster;
pub mod scoring;
pub mod swaps;
pub mod trades;
