//! Crawler module: the ingestion loop
//!
//! This module contains the run orchestration, including:
//! - Listing pagination and detail link discovery
//! - A bounded worker pool for detail pages
//! - Change detection against the vehicle ledger
//! - Checkpoints, resumption and cancellation

mod coordinator;
mod worker;

pub use coordinator::{Coordinator, StopHandle};
