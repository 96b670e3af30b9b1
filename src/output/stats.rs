//! Ledger statistics for `--stats`

use crate::storage::{LedgerStatistics, RunSummary};

/// Formats ledger totals and recent runs as plain text
pub fn format_statistics(stats: &LedgerStatistics, recent: &[RunSummary]) -> String {
    let mut out = String::new();

    out.push_str("=== Ledger Statistics ===\n\n");

    out.push_str("Vehicles:\n");
    out.push_str(&format!("  Active: {}\n", stats.active_vehicles));
    out.push_str(&format!("  Unavailable: {}\n", stats.unavailable_vehicles));
    out.push_str(&format!(
        "  Total tracked: {}\n\n",
        stats.active_vehicles + stats.unavailable_vehicles
    ));

    out.push_str(&format!("Stored runs: {}\n", stats.runs));
    out.push_str(&format!("Stored checkpoints: {}\n\n", stats.checkpoints));

    if recent.is_empty() {
        out.push_str("No runs recorded yet.\n");
        return out;
    }

    out.push_str(&format!("Recent Runs ({}):\n", recent.len()));
    for run in recent {
        let status = match run.finished_at {
            Some(finished) => format!("finished {}", finished.format("%Y-%m-%d %H:%M:%S")),
            None => "unfinished".to_string(),
        };
        out.push_str(&format!(
            "  {} [{}] started {}, {}: {} processed, {} new/changed, {} unchanged, {} rejected\n",
            run.id,
            run.mode,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            status,
            run.processed,
            run.success,
            run.skipped,
            run.errors
        ));
    }

    out
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &LedgerStatistics, recent: &[RunSummary]) {
    print!("{}", format_statistics(stats, recent));
}
