//! Per-record validation outcome
//!
//! Validation runs on a `VehicleDraft` before construction and collects every
//! problem at once (construction itself stops at the first one), plus soft
//! warnings and a completeness score used for run-level quality metrics.

use crate::model::vehicle::{is_http_url, suspicious_mileage, VehicleDraft};
use serde::{Deserialize, Serialize};

/// Fields counted by the completeness score
pub const COMPLETENESS_FIELDS: [&str; 13] = [
    "name",
    "brand",
    "model",
    "year",
    "price",
    "mileage",
    "fuel_type",
    "transmission",
    "category",
    "color",
    "doors",
    "description",
    "images",
];

/// Outcome of validating one candidate record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Fraction of `COMPLETENESS_FIELDS` present, in [0, 1]
    pub completeness: f64,
    pub missing_fields: Vec<String>,
}

impl ValidationResult {
    /// Validates a draft against the hard invariants and the completeness threshold
    pub fn validate(draft: &VehicleDraft, min_completeness: f64) -> Self {
        let mut errors: Vec<String> = draft
            .violations()
            .into_iter()
            .map(|violation| violation.to_string())
            .collect();
        let mut warnings = Vec::new();

        let missing_fields: Vec<String> = COMPLETENESS_FIELDS
            .iter()
            .filter(|field| !field_present(draft, field))
            .map(|field| field.to_string())
            .collect();
        let present = COMPLETENESS_FIELDS.len() - missing_fields.len();
        let completeness = present as f64 / COMPLETENESS_FIELDS.len() as f64;

        if completeness < min_completeness {
            errors.push(format!(
                "completeness {:.2} is below the minimum of {:.2} (missing: {})",
                completeness,
                min_completeness,
                missing_fields.join(", ")
            ));
        }

        for image in &draft.images {
            if !is_http_url(image) {
                warnings.push(format!("dropped malformed image URL '{}'", image));
            }
        }

        if let (Some(year), Some(mileage)) = (draft.year, draft.mileage) {
            if suspicious_mileage(year, mileage) {
                warnings.push(format!(
                    "model year {} with {} km is implausibly high mileage",
                    year, mileage
                ));
            }
        }

        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            completeness,
            missing_fields,
        }
    }
}

fn field_present(draft: &VehicleDraft, field: &str) -> bool {
    let text = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
    match field {
        "name" => text(&draft.name),
        "brand" => text(&draft.brand),
        "model" => text(&draft.model),
        "year" => draft.year.is_some(),
        "price" => draft.price.is_some(),
        "mileage" => draft.mileage.is_some(),
        "fuel_type" => draft.fuel_type.is_some(),
        "transmission" => draft.transmission.is_some(),
        "category" => draft.category.is_some(),
        "color" => text(&draft.color),
        "doors" => draft.doors.is_some(),
        "description" => text(&draft.description),
        "images" => draft.images.iter().any(|image| is_http_url(image)),
        _ => false,
    }
}
