use crate::model::result::ScrapingResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key holding the run the checkpoint belongs to
pub const META_RUN_ID: &str = "run_id";

/// Metadata key holding the identifiers already handled by the run
pub const META_PROCESSED_IDS: &str = "processed_ids";

/// Metadata key set to true on the final checkpoint of a completed run
pub const META_COMPLETED: &str = "completed";

/// Resumability marker taken during a run
///
/// Counters and `last_processed_id` reflect the moment the checkpoint was
/// taken. Under concurrency they may trail the true frontier; resumption
/// re-validates through content hashes, so that is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub processed: u64,
    pub success: u64,
    pub errors: u64,
    pub last_processed_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Checkpoint {
    /// Snapshots the counters of a running result
    pub fn from_result(
        result: &ScrapingResult,
        last_processed_id: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            META_RUN_ID.to_string(),
            serde_json::Value::String(result.id.clone()),
        );
        metadata.insert(
            "mode".to_string(),
            serde_json::Value::String(result.mode.as_str().to_string()),
        );
        metadata.insert("skipped".to_string(), serde_json::json!(result.skipped));

        Self {
            id: format!("{}-{:08}", result.id, result.processed),
            timestamp,
            processed: result.processed,
            success: result.success,
            errors: result.errors,
            last_processed_id,
            metadata,
        }
    }

    /// Run identifier recorded in the metadata, if any
    pub fn run_id(&self) -> Option<&str> {
        self.metadata.get(META_RUN_ID).and_then(|v| v.as_str())
    }

    /// Whether this checkpoint closed a run that finished normally
    pub fn is_completed(&self) -> bool {
        self.metadata
            .get(META_COMPLETED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Identifiers the run had already handled when the checkpoint was taken
    pub fn processed_ids(&self) -> Vec<String> {
        self.metadata
            .get(META_PROCESSED_IDS)
            .and_then(|v| v.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}
