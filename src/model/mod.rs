//! Shared value types
//!
//! - `Vehicle` / `VehicleDraft`: listing snapshot and its unvalidated candidate
//! - `ValidationResult`: per-record accept/reject decision with completeness
//! - `Checkpoint`: resumability marker
//! - `ScrapingResult`: aggregate outcome of one run

mod checkpoint;
mod enums;
mod hash;
mod result;
mod validation;
mod vehicle;

pub use checkpoint::{Checkpoint, META_COMPLETED, META_PROCESSED_IDS, META_RUN_ID};
pub use enums::{Category, FuelType, Transmission, UnknownVariant};
pub use hash::content_hash;
pub use result::{RejectedRecord, RunMode, ScrapingResult};
pub use validation::{ValidationResult, COMPLETENESS_FIELDS};
pub use vehicle::{
    is_http_url, max_year, sanitize_images, Vehicle, VehicleDraft, VehicleError, MAX_DOORS,
    MAX_MILEAGE, MAX_PRICE, MIN_DOORS, MIN_PRICE, MIN_YEAR, RECENT_MODEL_MILEAGE_LIMIT,
};

#[cfg(test)]
pub(crate) use vehicle::tests::sample_draft;
