//! Markdown run report
//!
//! A human-readable summary of one run: counters, quality, rejection reasons,
//! extraction health and, when available, ledger totals.

use crate::model::ScrapingResult;
use crate::output::OutputResult;
use crate::storage::LedgerStatistics;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the markdown report of a run
///
/// # Arguments
///
/// * `result` - The finished run
/// * `ledger` - Ledger totals after the run, if known
/// * `output_path` - Path where the markdown file should be written
pub fn write_run_report(
    result: &ScrapingResult,
    ledger: Option<&LedgerStatistics>,
    output_path: &Path,
) -> OutputResult<()> {
    let markdown = format_run_report(result, ledger);

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a run as markdown
pub fn format_run_report(result: &ScrapingResult, ledger: Option<&LedgerStatistics>) -> String {
    let mut md = String::new();

    md.push_str("# Listing Ingest Run Report\n\n");

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Run ID**: {}\n", result.id));
    md.push_str(&format!("- **Mode**: {}\n", result.mode));
    md.push_str(&format!("- **Started**: {}\n", result.started_at.to_rfc3339()));
    if let Some(finished) = result.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished.to_rfc3339()));
    }
    if let Some(duration) = result.duration() {
        let seconds = duration.num_seconds();
        md.push_str(&format!(
            "- **Duration**: {} seconds ({:.2} minutes)\n",
            seconds,
            seconds as f64 / 60.0
        ));
    }
    if let Some(hash) = result.metrics.get("config_hash").and_then(|v| v.as_str()) {
        md.push_str(&format!("- **Config Hash**: {}\n", hash));
    }
    if result.metrics.get("cancelled").and_then(|v| v.as_bool()) == Some(true) {
        md.push_str("- **Status**: cancelled\n");
    }
    md.push('\n');

    // Counters
    md.push_str("## Overall Statistics\n\n");
    md.push_str("| Outcome | Count |\n");
    md.push_str("|---------|-------|\n");
    md.push_str(&format!("| Processed | {} |\n", result.processed));
    md.push_str(&format!("| New or changed | {} |\n", result.success));
    md.push_str(&format!("| Unchanged | {} |\n", result.skipped));
    md.push_str(&format!("| Rejected | {} |\n\n", result.errors));
    md.push_str(&format!(
        "- **Success Rate**: {:.2}%\n",
        result.success_rate() * 100.0
    ));
    md.push_str(&format!(
        "- **Error Rate**: {:.2}%\n",
        result.error_rate() * 100.0
    ));
    if let Some(completeness) = result.metrics.get("avg_completeness").and_then(|v| v.as_f64()) {
        md.push_str(&format!(
            "- **Average Completeness**: {:.1}%\n",
            completeness * 100.0
        ));
    }
    md.push('\n');

    // Rejection reasons, most frequent first
    if !result.rejected.is_empty() {
        let mut reasons: BTreeMap<&str, u64> = BTreeMap::new();
        for rejected in &result.rejected {
            for reason in &rejected.reasons {
                *reasons.entry(reason.as_str()).or_default() += 1;
            }
        }
        let mut reasons: Vec<_> = reasons.into_iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        md.push_str("## Top Rejection Reasons\n\n");
        md.push_str("| Reason | Count |\n");
        md.push_str("|--------|-------|\n");
        for (reason, count) in reasons.iter().take(20) {
            md.push_str(&format!("| {} | {} |\n", reason.replace('|', "\\|"), count));
        }
        md.push('\n');
    }

    // Extraction health
    if let Some(fields) = result
        .metrics
        .get("extraction")
        .and_then(|v| v.get("fields"))
        .and_then(|v| v.as_object())
    {
        md.push_str("## Extraction Health\n\n");
        md.push_str("| Field | Hits per strategy | Misses |\n");
        md.push_str("|-------|-------------------|--------|\n");
        for (field, stats) in fields {
            let hits = stats
                .get("hits")
                .and_then(|v| v.as_array())
                .map(|hits| {
                    hits.iter()
                        .map(|h| h.to_string())
                        .collect::<Vec<_>>()
                        .join(" / ")
                })
                .unwrap_or_default();
            let misses = stats.get("misses").and_then(|v| v.as_u64()).unwrap_or(0);
            md.push_str(&format!("| {} | {} | {} |\n", field, hits, misses));
        }
        md.push('\n');
    }

    // HTTP counters
    if let Some(http) = result.metrics.get("http").and_then(|v| v.as_object()) {
        md.push_str("## HTTP\n\n");
        for (name, value) in http {
            md.push_str(&format!("- **{}**: {}\n", name, value));
        }
        md.push('\n');
    }

    if let Some(ledger) = ledger {
        md.push_str("## Ledger\n\n");
        md.push_str(&format!("- **Active vehicles**: {}\n", ledger.active_vehicles));
        md.push_str(&format!(
            "- **Unavailable vehicles**: {}\n",
            ledger.unavailable_vehicles
        ));
        md.push_str(&format!("- **Stored runs**: {}\n", ledger.runs));
        md.push_str(&format!("- **Stored checkpoints**: {}\n", ledger.checkpoints));
        md.push('\n');
    }

    md
}
