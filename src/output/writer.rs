//! Result artifact writer
//!
//! `json` writes the whole `ScrapingResult` as one pretty document. `jsonl`
//! writes one tagged object per line: a `run` header, then one `vehicle` line
//! per accepted record and one `rejected` line per rejection.

use crate::config::{OutputConfig, OutputFormat};
use crate::model::{RejectedRecord, RunMode, ScrapingResult, Vehicle};
use crate::output::OutputResult;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Serialize)]
struct RunHeader<'a> {
    id: &'a str,
    mode: RunMode,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    processed: u64,
    success: u64,
    errors: u64,
    skipped: u64,
    metrics: &'a BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum JsonLine<'a> {
    Run(RunHeader<'a>),
    Vehicle(&'a Vehicle),
    Rejected(&'a RejectedRecord),
}

/// Path the artifact is written to: `.gz` is appended when compressing
pub fn output_path(config: &OutputConfig) -> PathBuf {
    let already_gz = config
        .path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));

    if config.compress && !already_gz {
        let mut raw = config.path.clone().into_os_string();
        raw.push(".gz");
        PathBuf::from(raw)
    } else {
        config.path.clone()
    }
}

/// Writes the run result according to the output settings
///
/// Returns the path written.
pub fn write_result(result: &ScrapingResult, config: &OutputConfig) -> OutputResult<PathBuf> {
    let path = output_path(config);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = BufWriter::new(File::create(&path)?);
    if config.compress {
        let mut encoder = GzEncoder::new(file, Compression::default());
        write_body(result, config.format, &mut encoder)?;
        encoder.finish()?.flush()?;
    } else {
        let mut file = file;
        write_body(result, config.format, &mut file)?;
        file.flush()?;
    }

    info!(
        "Wrote {} vehicles and {} rejections to {}",
        result.vehicles.len(),
        result.rejected.len(),
        path.display()
    );
    Ok(path)
}

fn write_body<W: Write>(result: &ScrapingResult, format: OutputFormat, out: &mut W) -> OutputResult<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, result)?;
            out.write_all(b"\n")?;
        }
        OutputFormat::Jsonl => {
            let header = RunHeader {
                id: &result.id,
                mode: result.mode,
                started_at: result.started_at,
                finished_at: result.finished_at,
                processed: result.processed,
                success: result.success,
                errors: result.errors,
                skipped: result.skipped,
                metrics: &result.metrics,
            };
            write_line(out, &JsonLine::Run(header))?;
            for vehicle in &result.vehicles {
                write_line(out, &JsonLine::Vehicle(vehicle))?;
            }
            for rejected in &result.rejected {
                write_line(out, &JsonLine::Rejected(rejected))?;
            }
        }
    }
    Ok(())
}

fn write_line<W: Write>(out: &mut W, line: &JsonLine<'_>) -> OutputResult<()> {
    serde_json::to_writer(&mut *out, line)?;
    out.write_all(b"\n")?;
    Ok(())
}
