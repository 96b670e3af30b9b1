//! In-memory storage implementation
//!
//! Backs dry runs and tests. Nothing survives the process.

use crate::model::{Checkpoint, ScrapingResult};
use crate::state::VehicleStatus;
use crate::storage::traits::{StateResult, StateStore};
use crate::storage::{RunSummary, VehicleRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Volatile state backend
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    vehicles: HashMap<String, VehicleRecord>,
    /// Insertion order is checkpoint age
    checkpoints: Vec<Checkpoint>,
    /// Insertion order breaks `started_at` ties
    runs: Vec<ScrapingResult>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn summarize(result: &ScrapingResult) -> RunSummary {
    RunSummary {
        id: result.id.clone(),
        mode: result.mode,
        started_at: result.started_at,
        finished_at: result.finished_at,
        processed: result.processed,
        success: result.success,
        errors: result.errors,
        skipped: result.skipped,
    }
}

impl StateStore for MemoryStateStore {
    fn upsert_vehicle(
        &mut self,
        id: &str,
        content_hash: &str,
        metadata: &serde_json::Value,
        seen_at: DateTime<Utc>,
    ) -> StateResult<()> {
        let record = self
            .vehicles
            .entry(id.to_string())
            .or_insert_with(|| VehicleRecord {
                id: id.to_string(),
                content_hash: String::new(),
                status: VehicleStatus::Active,
                first_seen: seen_at,
                last_seen: seen_at,
                metadata: serde_json::Value::Null,
            });

        record.content_hash = content_hash.to_string();
        record.status = VehicleStatus::Active;
        record.last_seen = seen_at;
        record.metadata = metadata.clone();
        Ok(())
    }

    fn get_vehicle(&self, id: &str) -> StateResult<Option<VehicleRecord>> {
        Ok(self.vehicles.get(id).cloned())
    }

    fn update_vehicle_status(
        &mut self,
        id: &str,
        status: VehicleStatus,
        at: DateTime<Utc>,
    ) -> StateResult<bool> {
        match self.vehicles.get_mut(id) {
            Some(record) => {
                record.status = status;
                record.last_seen = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_vehicle_ids_by_status(&self, status: VehicleStatus) -> StateResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .vehicles
            .values()
            .filter(|record| record.status == status)
            .map(|record| record.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn count_vehicles_by_status(&self, status: VehicleStatus) -> StateResult<u64> {
        Ok(self
            .vehicles
            .values()
            .filter(|record| record.status == status)
            .count() as u64)
    }

    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> StateResult<()> {
        self.checkpoints.retain(|existing| existing.id != checkpoint.id);
        self.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    fn load_checkpoint(&self, id: &str) -> StateResult<Option<Checkpoint>> {
        Ok(self.checkpoints.iter().find(|cp| cp.id == id).cloned())
    }

    fn get_latest_checkpoint(&self) -> StateResult<Option<Checkpoint>> {
        Ok(self.checkpoints.last().cloned())
    }

    fn delete_old_checkpoints(&mut self, keep_count: usize) -> StateResult<usize> {
        let excess = self.checkpoints.len().saturating_sub(keep_count);
        self.checkpoints.drain(..excess);
        Ok(excess)
    }

    fn count_checkpoints(&self) -> StateResult<u64> {
        Ok(self.checkpoints.len() as u64)
    }

    fn save_run(&mut self, result: &ScrapingResult) -> StateResult<()> {
        match self.runs.iter_mut().find(|run| run.id == result.id) {
            Some(existing) => *existing = result.clone(),
            None => self.runs.push(result.clone()),
        }
        Ok(())
    }

    fn get_run(&self, id: &str) -> StateResult<Option<ScrapingResult>> {
        Ok(self.runs.iter().find(|run| run.id == id).cloned())
    }

    fn get_recent_runs(&self, limit: usize) -> StateResult<Vec<RunSummary>> {
        let mut ordered: Vec<(usize, &ScrapingResult)> = self.runs.iter().enumerate().collect();
        ordered.sort_by(|(ia, a), (ib, b)| {
            b.started_at.cmp(&a.started_at).then(ib.cmp(ia))
        });
        Ok(ordered
            .into_iter()
            .take(limit)
            .map(|(_, run)| summarize(run))
            .collect())
    }

    fn count_runs(&self) -> StateResult<u64> {
        Ok(self.runs.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunMode;
    use chrono::Duration;

    #[test]
    fn test_upsert_reactivates_and_keeps_first_seen() {
        let mut store = MemoryStateStore::new();
        let t0 = Utc::now();
        let meta = serde_json::json!({});

        store.upsert_vehicle("v1", "a", &meta, t0).unwrap();
        store
            .update_vehicle_status("v1", VehicleStatus::Unavailable, t0)
            .unwrap();
        store
            .upsert_vehicle("v1", "b", &meta, t0 + Duration::minutes(5))
            .unwrap();

        let record = store.get_vehicle("v1").unwrap().unwrap();
        assert_eq!(record.status, VehicleStatus::Active);
        assert_eq!(record.first_seen, t0);
        assert_eq!(record.content_hash, "b");
    }

    #[test]
    fn test_checkpoint_replace_moves_to_latest() {
        let mut store = MemoryStateStore::new();
        let mut cp = Checkpoint {
            id: "cp-1".to_string(),
            timestamp: Utc::now(),
            processed: 1,
            success: 1,
            errors: 0,
            last_processed_id: None,
            metadata: Default::default(),
        };
        store.save_checkpoint(&cp).unwrap();
        cp.id = "cp-2".to_string();
        store.save_checkpoint(&cp).unwrap();
        cp.id = "cp-1".to_string();
        cp.processed = 9;
        store.save_checkpoint(&cp).unwrap();

        assert_eq!(store.count_checkpoints().unwrap(), 2);
        let latest = store.get_latest_checkpoint().unwrap().unwrap();
        assert_eq!(latest.id, "cp-1");
        assert_eq!(latest.processed, 9);

        assert_eq!(store.delete_old_checkpoints(1).unwrap(), 1);
        assert!(store.load_checkpoint("cp-2").unwrap().is_none());
    }

    #[test]
    fn test_recent_runs_newest_first() {
        let mut store = MemoryStateStore::new();
        let now = Utc::now();
        let first = ScrapingResult::new(RunMode::Full, now - Duration::days(1));
        let second = ScrapingResult::new(RunMode::Incremental, now);
        store.save_run(&first).unwrap();
        store.save_run(&second).unwrap();
        store.save_run(&second).unwrap();

        let recent = store.get_recent_runs(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, second.id);
        assert_eq!(store.count_runs().unwrap(), 2);
    }
}
