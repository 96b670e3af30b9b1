//! Configuration module for Listing-Ingest
//!
//! Two TOML documents drive a run:
//!
//! - the settings document (`Config`): transport, politeness, workers, cache,
//!   output and quality thresholds
//! - the selector document (`SelectorConfig`): per-field selector chains,
//!   numeric patterns and canonical mapping tables
//!
//! Both are parsed and validated once at startup and then shared immutably.
//!
//! # Example
//!
//! ```no_run
//! use listing_ingest::config::{load_config, load_selectors};
//! use std::path::Path;
//!
//! let config = load_config(Path::new("ingest.toml")).unwrap();
//! let selectors = load_selectors(config.source.selectors_path.as_deref()).unwrap();
//! println!("Price strategies: {}", selectors.field_strategies("price").len());
//! ```

mod parser;
mod selectors;
mod types;
mod validation;

pub use types::{
    CacheConfig, Config, HttpConfig, LoggingConfig, OutputConfig, OutputFormat, QualityConfig,
    RateLimitConfig, SourceConfig, WorkerConfig,
};

pub use selectors::{
    fold_text, MappingTable, Patterns, SelectorConfig, SelectorDocument, SelectorStrategy,
    FIELD_NAMES,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, load_selectors};
pub use validation::MAX_QUALITY_SLACK;
