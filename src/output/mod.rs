//! Output module for run artifacts and reports
//!
//! This module handles:
//! - Writing the run result as JSON or JSON Lines, optionally gzip-compressed
//! - Generating a markdown report of a run
//! - Printing ledger statistics for `--stats`

mod markdown;
mod stats;
mod writer;

pub use markdown::{format_run_report, write_run_report};
pub use stats::{format_statistics, print_statistics};
pub use writer::{output_path, write_result};

use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
