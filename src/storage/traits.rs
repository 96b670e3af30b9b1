//! Storage traits and error types
//!
//! `StateStore` is the port behind `StateManager`. The SQLite backend is used
//! in production; the in-memory backend is used by tests and dry runs.

use crate::model::{Checkpoint, ScrapingResult};
use crate::state::VehicleStatus;
use crate::storage::{RunSummary, VehicleRecord};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during state store operations
///
/// Every variant is fatal for the current run.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State store lock poisoned")]
    LockPoisoned,

    #[error("Invalid status transition for '{id}': {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: VehicleStatus,
        to: VehicleStatus,
    },

    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),
}

/// Result type for state store operations
pub type StateResult<T> = Result<T, StateError>;

/// Durable ledgers: vehicles, checkpoints and run history
pub trait StateStore {
    // ===== Vehicle Ledger =====

    /// Inserts or replaces a vehicle's hash and metadata, marking it active
    ///
    /// `first_seen` is kept on update.
    fn upsert_vehicle(
        &mut self,
        id: &str,
        content_hash: &str,
        metadata: &serde_json::Value,
        seen_at: DateTime<Utc>,
    ) -> StateResult<()>;

    /// Gets a vehicle ledger row by id
    fn get_vehicle(&self, id: &str) -> StateResult<Option<VehicleRecord>>;

    /// Updates status and `last_seen` of an existing row
    ///
    /// Returns false when the id is unknown.
    fn update_vehicle_status(
        &mut self,
        id: &str,
        status: VehicleStatus,
        at: DateTime<Utc>,
    ) -> StateResult<bool>;

    /// Gets all ids with the given status, sorted
    fn get_vehicle_ids_by_status(&self, status: VehicleStatus) -> StateResult<Vec<String>>;

    /// Counts rows with the given status
    fn count_vehicles_by_status(&self, status: VehicleStatus) -> StateResult<u64>;

    // ===== Checkpoint Ledger =====

    /// Saves a checkpoint, replacing any checkpoint with the same id
    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> StateResult<()>;

    /// Loads a checkpoint by id
    fn load_checkpoint(&self, id: &str) -> StateResult<Option<Checkpoint>>;

    /// Gets the most recently taken checkpoint
    fn get_latest_checkpoint(&self) -> StateResult<Option<Checkpoint>>;

    /// Deletes all but the `keep_count` newest checkpoints, returning how many were removed
    fn delete_old_checkpoints(&mut self, keep_count: usize) -> StateResult<usize>;

    /// Counts stored checkpoints
    fn count_checkpoints(&self) -> StateResult<u64>;

    // ===== Run History =====

    /// Saves a run result, replacing a previous save of the same run
    fn save_run(&mut self, result: &ScrapingResult) -> StateResult<()>;

    /// Gets a stored run result by id
    fn get_run(&self, id: &str) -> StateResult<Option<ScrapingResult>>;

    /// Gets summaries of the most recent runs, newest first
    fn get_recent_runs(&self, limit: usize) -> StateResult<Vec<RunSummary>>;

    /// Counts stored runs
    fn count_runs(&self) -> StateResult<u64>;
}
