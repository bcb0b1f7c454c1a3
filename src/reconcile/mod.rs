//! Reconciliation
//!
//! Merges authoritative remote snapshots into the local cache without
//! ever losing or duplicating history.

pub mod engine;

pub use engine::{MergeReport, ReconciliationEngine};
