use crate::model::vehicle::Vehicle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Whether a run reconciles the whole active set or only reports changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Full,
    Incremental,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            other => Err(format!("unknown run mode '{}'", other)),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detail page that did not yield an accepted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub url: String,
    pub id: Option<String>,
    /// Human-readable reasons, never empty
    pub reasons: Vec<String>,
}

impl RejectedRecord {
    pub fn new(url: impl Into<String>, id: Option<String>, reasons: Vec<String>) -> Self {
        let reasons = if reasons.is_empty() {
            vec!["rejected without a recorded reason".to_string()]
        } else {
            reasons
        };
        Self {
            url: url.into(),
            id,
            reasons,
        }
    }
}

/// Aggregate outcome of one run
///
/// Owned and mutated only by the run that created it.
/// `processed == success + errors + skipped` holds at all times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapingResult {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub mode: RunMode,
    pub processed: u64,
    pub success: u64,
    pub errors: u64,
    pub skipped: u64,
    pub vehicles: Vec<Vehicle>,
    pub rejected: Vec<RejectedRecord>,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl ScrapingResult {
    pub fn new(mode: RunMode, started_at: DateTime<Utc>) -> Self {
        Self {
            id: format!(
                "run-{}-{}",
                started_at.format("%Y%m%dT%H%M%S%.3fZ"),
                run_suffix()
            ),
            started_at,
            finished_at: None,
            mode,
            processed: 0,
            success: 0,
            errors: 0,
            skipped: 0,
            vehicles: Vec::new(),
            rejected: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    /// Records a new or changed vehicle
    pub fn record_accepted(&mut self, vehicle: Vehicle) {
        self.processed += 1;
        self.success += 1;
        self.vehicles.push(vehicle);
    }

    /// Records a page that failed fetching, extraction or validation
    pub fn record_rejected(&mut self, rejected: RejectedRecord) {
        self.processed += 1;
        self.errors += 1;
        self.rejected.push(rejected);
    }

    /// Records a valid vehicle whose content hash is unchanged
    pub fn record_skipped(&mut self) {
        self.processed += 1;
        self.skipped += 1;
    }

    pub fn set_metric(&mut self, name: &str, value: impl Into<serde_json::Value>) {
        self.metrics.insert(name.to_string(), value.into());
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Wall-clock duration, available once the run has finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Share of processed items that were accepted or skipped as unchanged
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            (self.success + self.skipped) as f64 / self.processed as f64
        }
    }

    /// Share of processed items that were rejected
    pub fn error_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.errors as f64 / self.processed as f64
        }
    }
}

/// Disambiguates runs started in the same millisecond, within and across processes
fn run_suffix() -> String {
    let sequence = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let wall_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(wall_nanos.to_le_bytes());
    hex::encode(&hasher.finalize()[..4])
}
