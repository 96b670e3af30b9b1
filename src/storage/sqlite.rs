//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the StateStore trait.

use crate::model::{Checkpoint, RunMode, ScrapingResult};
use crate::state::VehicleStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StateError, StateResult, StateStore};
use crate::storage::{format_timestamp, parse_timestamp, RunSummary, VehicleRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;

/// SQLite state backend
pub struct SqliteStateStore {
    conn: Connection,
}

impl SqliteStateStore {
    /// Opens or creates the state database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStateStore)` - Successfully opened/created database
    /// * `Err(StateError)` - Failed to open database
    pub fn new(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StateResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn status_from_row(raw: &str) -> StateResult<VehicleStatus> {
    VehicleStatus::from_db_string(raw)
        .ok_or_else(|| StateError::Corrupt(format!("unknown vehicle status '{}'", raw)))
}

fn mode_from_row(raw: &str) -> StateResult<RunMode> {
    raw.parse::<RunMode>().map_err(StateError::Corrupt)
}

/// Raw `runs` row before timestamp and mode parsing
struct RunRow {
    id: String,
    mode: String,
    started_at: String,
    finished_at: Option<String>,
    processed: i64,
    success: i64,
    errors: i64,
    skipped: i64,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            mode: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            processed: row.get(4)?,
            success: row.get(5)?,
            errors: row.get(6)?,
            skipped: row.get(7)?,
        })
    }

    fn into_summary(self) -> StateResult<RunSummary> {
        Ok(RunSummary {
            id: self.id,
            mode: mode_from_row(&self.mode)?,
            started_at: parse_timestamp(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_timestamp).transpose()?,
            processed: self.processed as u64,
            success: self.success as u64,
            errors: self.errors as u64,
            skipped: self.skipped as u64,
        })
    }
}

/// Raw `checkpoints` row
struct CheckpointRow {
    id: String,
    timestamp: String,
    processed: i64,
    success: i64,
    errors: i64,
    last_processed_id: Option<String>,
    metadata: String,
}

impl CheckpointRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            processed: row.get(2)?,
            success: row.get(3)?,
            errors: row.get(4)?,
            last_processed_id: row.get(5)?,
            metadata: row.get(6)?,
        })
    }

    fn into_checkpoint(self) -> StateResult<Checkpoint> {
        let metadata: BTreeMap<String, serde_json::Value> = serde_json::from_str(&self.metadata)?;
        Ok(Checkpoint {
            id: self.id,
            timestamp: parse_timestamp(&self.timestamp)?,
            processed: self.processed as u64,
            success: self.success as u64,
            errors: self.errors as u64,
            last_processed_id: self.last_processed_id,
            metadata,
        })
    }
}

const CHECKPOINT_COLUMNS: &str =
    "id, timestamp, processed, success, errors, last_processed_id, metadata";

const RUN_SUMMARY_COLUMNS: &str =
    "id, mode, started_at, finished_at, processed, success, errors, skipped";

impl StateStore for SqliteStateStore {
    // ===== Vehicle Ledger =====

    fn upsert_vehicle(
        &mut self,
        id: &str,
        content_hash: &str,
        metadata: &serde_json::Value,
        seen_at: DateTime<Utc>,
    ) -> StateResult<()> {
        let now = format_timestamp(seen_at);
        self.conn.execute(
            "INSERT INTO vehicles (id, content_hash, status, first_seen, last_seen, metadata)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                content_hash = excluded.content_hash,
                status = excluded.status,
                last_seen = excluded.last_seen,
                metadata = excluded.metadata",
            params![
                id,
                content_hash,
                VehicleStatus::Active.to_db_string(),
                now,
                serde_json::to_string(metadata)?
            ],
        )?;
        Ok(())
    }

    fn get_vehicle(&self, id: &str) -> StateResult<Option<VehicleRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, content_hash, status, first_seen, last_seen, metadata
                 FROM vehicles WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((id, content_hash, status, first_seen, last_seen, metadata)) => {
                Ok(Some(VehicleRecord {
                    id,
                    content_hash,
                    status: status_from_row(&status)?,
                    first_seen: parse_timestamp(&first_seen)?,
                    last_seen: parse_timestamp(&last_seen)?,
                    metadata: serde_json::from_str(&metadata)?,
                }))
            }
        }
    }

    fn update_vehicle_status(
        &mut self,
        id: &str,
        status: VehicleStatus,
        at: DateTime<Utc>,
    ) -> StateResult<bool> {
        let changed = self.conn.execute(
            "UPDATE vehicles SET status = ?1, last_seen = ?2 WHERE id = ?3",
            params![status.to_db_string(), format_timestamp(at), id],
        )?;
        Ok(changed > 0)
    }

    fn get_vehicle_ids_by_status(&self, status: VehicleStatus) -> StateResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM vehicles WHERE status = ?1 ORDER BY id")?;

        let ids = stmt
            .query_map(params![status.to_db_string()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(ids)
    }

    fn count_vehicles_by_status(&self, status: VehicleStatus) -> StateResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM vehicles WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Checkpoint Ledger =====

    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> StateResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO checkpoints
                (id, run_id, timestamp, processed, success, errors, last_processed_id, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                checkpoint.id,
                checkpoint.run_id(),
                format_timestamp(checkpoint.timestamp),
                checkpoint.processed as i64,
                checkpoint.success as i64,
                checkpoint.errors as i64,
                checkpoint.last_processed_id,
                serde_json::to_string(&checkpoint.metadata)?
            ],
        )?;
        Ok(())
    }

    fn load_checkpoint(&self, id: &str) -> StateResult<Option<Checkpoint>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM checkpoints WHERE id = ?1", CHECKPOINT_COLUMNS),
                params![id],
                CheckpointRow::from_row,
            )
            .optional()?;

        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    fn get_latest_checkpoint(&self) -> StateResult<Option<Checkpoint>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM checkpoints ORDER BY seq DESC LIMIT 1",
                    CHECKPOINT_COLUMNS
                ),
                [],
                CheckpointRow::from_row,
            )
            .optional()?;

        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    fn delete_old_checkpoints(&mut self, keep_count: usize) -> StateResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM checkpoints WHERE seq NOT IN
                (SELECT seq FROM checkpoints ORDER BY seq DESC LIMIT ?1)",
            params![keep_count as i64],
        )?;
        Ok(deleted)
    }

    fn count_checkpoints(&self) -> StateResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM checkpoints", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Run History =====

    fn save_run(&mut self, result: &ScrapingResult) -> StateResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO runs
                (id, mode, started_at, finished_at, processed, success, errors, skipped, result_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                result.id,
                result.mode.as_str(),
                format_timestamp(result.started_at),
                result.finished_at.map(format_timestamp),
                result.processed as i64,
                result.success as i64,
                result.errors as i64,
                result.skipped as i64,
                serde_json::to_string(result)?
            ],
        )?;
        Ok(())
    }

    fn get_run(&self, id: &str) -> StateResult<Option<ScrapingResult>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT result_json FROM runs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|raw| serde_json::from_str(&raw).map_err(StateError::from))
            .transpose()
    }

    fn get_recent_runs(&self, limit: usize) -> StateResult<Vec<RunSummary>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            RUN_SUMMARY_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![limit as i64], RunRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RunRow::into_summary).collect()
    }

    fn count_runs(&self) -> StateResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RejectedRecord, META_COMPLETED};
    use chrono::Duration;
    use tempfile::TempDir;

    fn store() -> SqliteStateStore {
        SqliteStateStore::new_in_memory().unwrap()
    }

    fn checkpoint(id: &str, processed: u64) -> Checkpoint {
        Checkpoint {
            id: id.to_string(),
            timestamp: Utc::now(),
            processed,
            success: processed,
            errors: 0,
            last_processed_id: Some(format!("v{}", processed)),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_upsert_keeps_first_seen() {
        let mut store = store();
        let t0 = Utc::now();
        let t1 = t0 + Duration::hours(1);
        let meta = serde_json::json!({"brand": "Honda"});

        store.upsert_vehicle("v1", "hash-a", &meta, t0).unwrap();
        store.upsert_vehicle("v1", "hash-b", &meta, t1).unwrap();

        let record = store.get_vehicle("v1").unwrap().unwrap();
        assert_eq!(record.content_hash, "hash-b");
        assert_eq!(record.status, VehicleStatus::Active);
        assert_eq!(record.first_seen, parse_timestamp(&format_timestamp(t0)).unwrap());
        assert_eq!(record.last_seen, parse_timestamp(&format_timestamp(t1)).unwrap());
        assert_eq!(record.metadata["brand"], "Honda");
    }

    #[test]
    fn test_status_updates_and_queries() {
        let mut store = store();
        let now = Utc::now();
        let meta = serde_json::json!({});
        for id in ["b", "a", "c"] {
            store.upsert_vehicle(id, "h", &meta, now).unwrap();
        }

        assert!(store
            .update_vehicle_status("b", VehicleStatus::Unavailable, now)
            .unwrap());
        assert!(!store
            .update_vehicle_status("missing", VehicleStatus::Unavailable, now)
            .unwrap());

        assert_eq!(
            store.get_vehicle_ids_by_status(VehicleStatus::Active).unwrap(),
            vec!["a", "c"]
        );
        assert_eq!(
            store
                .count_vehicles_by_status(VehicleStatus::Unavailable)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_checkpoint_ledger() {
        let mut store = store();
        assert!(store.get_latest_checkpoint().unwrap().is_none());

        for i in 1..=5 {
            store.save_checkpoint(&checkpoint(&format!("cp-{}", i), i)).unwrap();
        }

        let latest = store.get_latest_checkpoint().unwrap().unwrap();
        assert_eq!(latest.id, "cp-5");
        assert_eq!(latest.last_processed_id.as_deref(), Some("v5"));

        let loaded = store.load_checkpoint("cp-2").unwrap().unwrap();
        assert_eq!(loaded.processed, 2);

        assert_eq!(store.delete_old_checkpoints(2).unwrap(), 3);
        assert_eq!(store.count_checkpoints().unwrap(), 2);
        assert!(store.load_checkpoint("cp-2").unwrap().is_none());
        assert!(store.load_checkpoint("cp-4").unwrap().is_some());
    }

    #[test]
    fn test_checkpoint_metadata_roundtrip() {
        let mut store = store();
        let mut cp = checkpoint("cp-final", 10);
        cp.metadata
            .insert(META_COMPLETED.to_string(), serde_json::json!(true));
        store.save_checkpoint(&cp).unwrap();

        let loaded = store.load_checkpoint("cp-final").unwrap().unwrap();
        assert!(loaded.is_completed());
    }

    #[test]
    fn test_run_history() {
        let mut store = store();
        let start = Utc::now();

        let mut older = ScrapingResult::new(RunMode::Full, start - Duration::hours(2));
        older.record_skipped();
        older.finish(start - Duration::hours(1));
        store.save_run(&older).unwrap();

        let mut newer = ScrapingResult::new(RunMode::Incremental, start);
        newer.record_rejected(RejectedRecord::new(
            "https://www.example.com/carros/1",
            None,
            vec!["missing required field 'price'".to_string()],
        ));
        store.save_run(&newer).unwrap();

        let recent = store.get_recent_runs(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, newer.id);
        assert_eq!(recent[0].mode, RunMode::Incremental);
        assert!(recent[0].finished_at.is_none());
        assert_eq!(recent[1].skipped, 1);

        let loaded = store.get_run(&newer.id).unwrap().unwrap();
        assert_eq!(loaded.rejected.len(), 1);
        assert!(store.get_run("run-missing").unwrap().is_none());
        assert_eq!(store.count_runs().unwrap(), 2);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.db");

        {
            let mut store = SqliteStateStore::new(&path).unwrap();
            store
                .upsert_vehicle("v1", "h", &serde_json::json!({}), Utc::now())
                .unwrap();
        }

        let store = SqliteStateStore::new(&path).unwrap();
        assert!(store.get_vehicle("v1").unwrap().is_some());
    }
}
