//! Listing-Ingest: resilient, incremental ingestion of vehicle listings
//!
//! This crate fetches listing and detail pages from a single source, extracts
//! and normalizes vehicle records through configurable selector chains, and
//! tracks content hashes across runs so that only changed records are
//! reported downstream.

pub mod config;
pub mod crawler;
pub mod http;
pub mod model;
pub mod output;
pub mod parser;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Listing-Ingest operations
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] http::FetchError),

    #[error("State store error: {0}")]
    State(#[from] storage::StateError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector for '{field}': {selector}")]
    InvalidSelector { field: String, selector: String },

    #[error("Invalid pattern for '{field}': {message}")]
    InvalidPattern { field: String, message: String },

    #[error("Invalid mapping in '{table}': {alias} -> {target}")]
    InvalidMapping {
        table: String,
        alias: String,
        target: String,
    },
}

/// Result type alias for Listing-Ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{Config, SelectorConfig};
pub use crawler::{Coordinator, StopHandle};
pub use model::{RunMode, ScrapingResult, ValidationResult, Vehicle};
pub use state::{StateManager, VehicleStatus};
