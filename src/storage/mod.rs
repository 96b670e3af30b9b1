//! Storage module for persisting ingestion state
//!
//! This module handles the durable ledgers behind `StateManager`:
//! - Vehicle ledger: content hash, status and first/last seen per identifier
//! - Checkpoint ledger: resumability markers
//! - Run history: every run result, for auditing and statistics

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;
pub use traits::{StateError, StateResult, StateStore};

use crate::model::RunMode;
use crate::state::VehicleStatus;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// Represents a vehicle in the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleRecord {
    pub id: String,
    pub content_hash: String,
    pub status: VehicleStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Counters of a stored run, without the record lists
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processed: u64,
    pub success: u64,
    pub errors: u64,
    pub skipped: u64,
}

/// Aggregate ledger counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStatistics {
    pub active_vehicles: u64,
    pub unavailable_vehicles: u64,
    pub checkpoints: u64,
    pub runs: u64,
    pub latest_run: Option<RunSummary>,
}

/// Timestamps are stored as fixed-width RFC 3339 strings so they sort as text
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> StateResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StateError::Corrupt(format!("invalid timestamp '{}': {}", raw, e)))
}
