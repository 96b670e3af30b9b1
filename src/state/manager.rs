//! Cross-run state: change detection, checkpoints and run history
//!
//! All ledger access goes through one lock, so writes to the vehicle and
//! checkpoint ledgers are serialized no matter how many tasks hold a clone.
//! Any store failure is returned to the caller; the crawl loop aborts the run
//! on it.

use crate::http::Clock;
use crate::model::{Checkpoint, ScrapingResult};
use crate::state::VehicleStatus;
use crate::storage::{
    LedgerStatistics, MemoryStateStore, RunSummary, SqliteStateStore, StateError, StateResult,
    StateStore,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Shared handle to the durable ledgers
#[derive(Clone)]
pub struct StateManager {
    store: Arc<Mutex<Box<dyn StateStore + Send>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager").finish_non_exhaustive()
    }
}

impl StateManager {
    /// Wraps an existing store
    pub fn new(store: Box<dyn StateStore + Send>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            clock,
        }
    }

    /// Opens (or creates) the SQLite ledger at `path`
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> StateResult<Self> {
        let store = SqliteStateStore::new(path)?;
        info!("Opened state database at {}", path.display());
        Ok(Self::new(Box::new(store), clock))
    }

    /// Volatile ledger for dry runs and tests
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Box::new(MemoryStateStore::new()), clock)
    }

    fn lock(&self) -> StateResult<MutexGuard<'_, Box<dyn StateStore + Send>>> {
        self.store.lock().map_err(|_| StateError::LockPoisoned)
    }

    // ===== Vehicle Ledger =====

    /// Records a vehicle's current content hash and metadata, marking it active
    pub fn save_vehicle_hash(
        &self,
        id: &str,
        content_hash: &str,
        metadata: &serde_json::Value,
    ) -> StateResult<()> {
        let now = self.clock.utc_now();
        self.lock()?.upsert_vehicle(id, content_hash, metadata, now)
    }

    /// Stored content hash for `id`, if the vehicle has been seen before
    pub fn get_vehicle_hash(&self, id: &str) -> StateResult<Option<String>> {
        Ok(self.lock()?.get_vehicle(id)?.map(|record| record.content_hash))
    }

    /// Returns true if `id` is unseen or its stored hash differs from `content_hash`
    pub fn has_changed(&self, id: &str, content_hash: &str) -> StateResult<bool> {
        Ok(self
            .get_vehicle_hash(id)?
            .map_or(true, |stored| stored != content_hash))
    }

    /// Reconfirms an unchanged vehicle without rewriting its hash
    ///
    /// An unavailable vehicle becomes active again. Returns false when the id
    /// is unknown.
    pub fn mark_vehicle_seen(&self, id: &str) -> StateResult<bool> {
        let now = self.clock.utc_now();
        let mut store = self.lock()?;
        if store.get_vehicle(id)?.is_none() {
            return Ok(false);
        }
        store.update_vehicle_status(id, VehicleStatus::Active, now)
    }

    /// Soft-deletes a vehicle that no longer appears in the source
    ///
    /// Returns false when the id is unknown. Marking an already unavailable
    /// vehicle is an invalid transition.
    pub fn mark_vehicle_unavailable(&self, id: &str) -> StateResult<bool> {
        let now = self.clock.utc_now();
        let mut store = self.lock()?;
        let Some(record) = store.get_vehicle(id)? else {
            return Ok(false);
        };

        if !record.status.can_transition_to(VehicleStatus::Unavailable) {
            return Err(StateError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
                to: VehicleStatus::Unavailable,
            });
        }

        store.update_vehicle_status(id, VehicleStatus::Unavailable, now)
    }

    /// Current status of a tracked vehicle
    pub fn get_vehicle_status(&self, id: &str) -> StateResult<Option<VehicleStatus>> {
        Ok(self.lock()?.get_vehicle(id)?.map(|record| record.status))
    }

    /// Ids of all active vehicles, sorted
    pub fn get_active_vehicle_ids(&self) -> StateResult<Vec<String>> {
        self.lock()?.get_vehicle_ids_by_status(VehicleStatus::Active)
    }

    /// Marks every active vehicle missing from `seen_ids` unavailable
    ///
    /// Returns the ids that were transitioned, sorted.
    pub fn reconcile_unavailable(&self, seen_ids: &HashSet<String>) -> StateResult<Vec<String>> {
        let now = self.clock.utc_now();
        let mut store = self.lock()?;

        let missing: Vec<String> = store
            .get_vehicle_ids_by_status(VehicleStatus::Active)?
            .into_iter()
            .filter(|id| !seen_ids.contains(id))
            .collect();

        for id in &missing {
            store.update_vehicle_status(id, VehicleStatus::Unavailable, now)?;
            debug!("Vehicle {} marked unavailable", id);
        }

        if !missing.is_empty() {
            info!("{} vehicles no longer listed, marked unavailable", missing.len());
        }

        Ok(missing)
    }

    // ===== Checkpoint Ledger =====

    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> StateResult<()> {
        self.lock()?.save_checkpoint(checkpoint)?;
        debug!(
            "Checkpoint {} saved ({} processed)",
            checkpoint.id, checkpoint.processed
        );
        Ok(())
    }

    pub fn load_checkpoint(&self, id: &str) -> StateResult<Option<Checkpoint>> {
        self.lock()?.load_checkpoint(id)
    }

    pub fn get_latest_checkpoint(&self) -> StateResult<Option<Checkpoint>> {
        self.lock()?.get_latest_checkpoint()
    }

    /// Keeps only the `keep_count` newest checkpoints
    pub fn delete_old_checkpoints(&self, keep_count: usize) -> StateResult<usize> {
        let deleted = self.lock()?.delete_old_checkpoints(keep_count)?;
        if deleted > 0 {
            debug!("Deleted {} old checkpoints", deleted);
        }
        Ok(deleted)
    }

    // ===== Run History =====

    pub fn save_scraping_run(&self, result: &ScrapingResult) -> StateResult<()> {
        self.lock()?.save_run(result)
    }

    pub fn get_scraping_run(&self, id: &str) -> StateResult<Option<ScrapingResult>> {
        self.lock()?.get_run(id)
    }

    /// Summaries of the most recent runs, newest first
    pub fn get_recent_runs(&self, limit: usize) -> StateResult<Vec<RunSummary>> {
        self.lock()?.get_recent_runs(limit)
    }

    /// Aggregate counts across all three ledgers
    pub fn get_statistics(&self) -> StateResult<LedgerStatistics> {
        let store = self.lock()?;
        Ok(LedgerStatistics {
            active_vehicles: store.count_vehicles_by_status(VehicleStatus::Active)?,
            unavailable_vehicles: store.count_vehicles_by_status(VehicleStatus::Unavailable)?,
            checkpoints: store.count_checkpoints()?,
            runs: store.count_runs()?,
            latest_run: store.get_recent_runs(1)?.into_iter().next(),
        })
    }
}
